// Copyright (c) 2024-present, tidemark-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub(crate) mod state;

#[allow(clippy::module_name_repetitions)]
pub mod write_tx;
