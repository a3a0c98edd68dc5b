use test_log::test;
use tidemark::{Error, Store};

#[test]
fn tx_ryow() -> tidemark::Result<()> {
    let store = Store::new();
    store.insert("a", "previous")?;

    let mut tx = store.write_tx();
    assert_eq!(Some("previous".as_bytes().into()), tx.get("a")?);

    tx.insert("a", "new")?;
    tx.insert("b", "new")?;
    tx.remove("c")?;

    assert_eq!(Some("new".as_bytes().into()), tx.get("a")?);
    assert_eq!(Some("new".as_bytes().into()), tx.get("b")?);
    assert!(!tx.contains_key("c")?);
    assert_eq!(3, tx.len());

    assert_eq!(Some("previous".as_bytes().into()), store.get("a")?);
    assert!(!store.contains_key("b")?);

    tx.commit()?;

    assert_eq!(Some("new".as_bytes().into()), store.get("a")?);
    assert_eq!(Some("new".as_bytes().into()), store.get("b")?);
    assert_eq!(2, store.len());

    Ok(())
}

#[test]
fn tx_rollback() -> tidemark::Result<()> {
    let store = Store::new();
    store.insert("a", "1")?;

    {
        let mut tx = store.write_tx();
        tx.insert("a", "2")?;
        tx.remove("a")?;
        tx.insert("b", "2")?;

        // NOTE: The transaction pins a snapshot of the store
        assert_eq!(1, store.registry().len());
    }

    assert_eq!(Some("1".as_bytes().into()), store.get("a")?);
    assert!(!store.contains_key("b")?);
    assert_eq!(1, store.seqno());
    assert!(store.registry().is_empty());

    Ok(())
}

#[test]
fn tx_repeatable_read() -> tidemark::Result<()> {
    let store = Store::new();
    store.insert("a", "1")?;

    let tx = store.write_tx();

    store.insert("a", "2")?;
    store.insert("b", "2")?;

    assert_eq!(Some("1".as_bytes().into()), tx.get("a")?);
    assert!(!tx.contains_key("b")?);

    // NOTE: Original values are always read from the parent
    assert_eq!(Some("2".as_bytes().into()), tx.original_value("a")?);

    Ok(())
}

#[test]
fn tx_last_commit_wins() -> tidemark::Result<()> {
    let store = Store::new();

    let mut tx1 = store.write_tx();
    let mut tx2 = store.write_tx();

    tx1.insert("a", "tx1")?;
    tx2.insert("a", "tx2")?;

    tx2.commit()?;
    tx1.commit()?;

    assert_eq!(Some("tx1".as_bytes().into()), store.get("a")?);
    assert_eq!(2, store.seqno());

    Ok(())
}

#[test]
fn tx_take_and_update() -> tidemark::Result<()> {
    let store = Store::new();
    store.insert("counter", 0u64.to_be_bytes())?;
    store.insert("gone", "x")?;

    let mut tx = store.write_tx();

    for _ in 0..10 {
        tx.update_fetch("counter", |prev| {
            let prev = prev.map_or(0, |bytes| {
                let mut buf = [0; 8];
                buf.copy_from_slice(bytes);
                u64::from_be_bytes(buf)
            });
            Some((prev + 1).to_be_bytes().as_slice().into())
        })?;
    }

    let taken = tx.take("gone")?;
    assert_eq!(Some("x".as_bytes().into()), taken);
    assert_eq!(None, tx.take("gone")?);

    // NOTE: Removing a missing key does not write
    let prev = tx.fetch_update("untouched", |_| None)?;
    assert_eq!(None, prev);
    assert!(!tx.write_set().contains_key(b"untouched"));

    tx.commit()?;

    assert_eq!(
        Some(10u64.to_be_bytes().as_slice().into()),
        store.get("counter")?
    );
    assert!(!store.contains_key("gone")?);

    Ok(())
}

#[test]
fn tx_nested() -> tidemark::Result<()> {
    let store = Store::new();
    store.insert("a", "0")?;

    let mut outer = store.write_tx();
    outer.insert("a", "outer")?;

    let mut inner = outer.write_tx()?;
    assert_eq!(Some("outer".as_bytes().into()), inner.get("a")?);

    inner.insert("a", "inner")?;
    inner.insert("b", "inner")?;

    assert_eq!(Some("outer".as_bytes().into()), outer.get("a")?);

    inner.commit()?;

    assert_eq!(Some("inner".as_bytes().into()), outer.get("a")?);
    assert_eq!(Some("inner".as_bytes().into()), outer.get("b")?);
    assert_eq!(Some("0".as_bytes().into()), store.get("a")?);

    outer.commit()?;

    assert_eq!(Some("inner".as_bytes().into()), store.get("a")?);
    assert_eq!(Some("inner".as_bytes().into()), store.get("b")?);
    assert!(store.registry().is_empty());

    Ok(())
}

#[test]
fn tx_nested_rollback() -> tidemark::Result<()> {
    let store = Store::new();

    let mut outer = store.write_tx();
    outer.insert("a", "outer")?;

    {
        let mut inner = outer.write_tx()?;
        inner.insert("a", "inner")?;
    }

    assert!(outer.registry().is_empty());
    assert_eq!(Some("outer".as_bytes().into()), outer.get("a")?);

    outer.commit()?;
    assert_eq!(Some("outer".as_bytes().into()), store.get("a")?);

    Ok(())
}

#[test]
fn tx_commit_into_wrong_store() -> tidemark::Result<()> {
    let a = Store::new();
    let b = Store::new();

    let mut tx = a.write_tx();
    tx.insert("a", "1")?;

    let result = b.registry().apply_tx(&tx);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));

    // NOTE: The rejected transaction is still usable
    assert!(!tx.is_committed());
    tx.commit()?;
    assert!(a.contains_key("a")?);

    Ok(())
}

#[test]
fn tx_committed_rejects_snapshot() -> tidemark::Result<()> {
    let store = Store::new();
    store.insert("a", "0")?;

    let mut tx = store.write_tx();
    tx.insert("b", "1")?;

    store.registry().apply_tx(&tx)?;
    assert!(tx.is_committed());

    // NOTE: The committed transaction does not pin a view of the store anymore
    assert!(matches!(tx.snapshot(), Err(Error::InvalidArgument(_))));
    assert!(matches!(tx.write_tx(), Err(Error::InvalidArgument(_))));
    assert!(tx.registry().is_empty());

    store.insert("a", "changed")?;
    assert_eq!(Some("changed".as_bytes().into()), store.get("a")?);
    assert!(store.registry().is_empty());

    Ok(())
}

#[test]
fn tx_nested_commit_into_committed_parent() -> tidemark::Result<()> {
    let store = Store::new();

    let mut outer = store.write_tx();
    outer.insert("a", "outer")?;

    let mut inner = outer.write_tx()?;
    inner.insert("a", "inner")?;

    store.registry().apply_tx(&outer)?;

    let Err(Error::InvalidArgument(msg)) = inner.commit() else {
        panic!("nested commit should be rejected");
    };
    assert_eq!("parent transaction has already been committed", msg);

    assert_eq!(Some("outer".as_bytes().into()), store.get("a")?);

    Ok(())
}
