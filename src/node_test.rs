use super::*;

#[test]
fn workers() {
    let mut workers = Workers::new();

    (0..5).for_each(|i| {
        let idx = workers.insert(WorkerId::new(format!("worker{i}")), i).unwrap();
        assert_eq!(workers.get(idx), Some(&i));
        assert_eq!(workers.id(idx).unwrap().as_str(), format!("worker{i}"));
    });
    assert_eq!(workers.len(), 5);

    // Iteration follows registration order.
    let ids: Vec<_> = workers.iter().map(|(_, id, _)| id.to_string()).collect();
    assert_eq!(ids, ["worker0", "worker1", "worker2", "worker3", "worker4"]);
    for (idx, id, _) in workers.iter() {
        assert_eq!(workers.idx(id), Some(idx));
    }

    // Identities are unique.
    assert_eq!(
        workers.insert("worker2".into(), 42),
        Err(ClusterError::DuplicateWorker("worker2".into()))
    );

    // Reuse indices, newcomers go to the back of the order.
    let remove_idx = workers.idx(&"worker3".into()).unwrap();
    let (removed_id, removed) = workers.remove(remove_idx).unwrap();
    assert_eq!(removed_id.as_str(), "worker3");
    assert_eq!(removed, 3);
    assert!(workers.get(remove_idx).is_none());
    assert!(workers.remove(remove_idx).is_none());

    let new_idx = workers.insert("worker6".into(), 6).unwrap();
    assert_eq!(new_idx, remove_idx);
    let ids: Vec<_> = workers.iter().map(|(_, id, _)| id.to_string()).collect();
    assert_eq!(ids, ["worker0", "worker1", "worker2", "worker4", "worker6"]);
}

#[test]
fn out_of_indices() {
    let mut workers = Workers::new();
    for i in 0..WorkerIdx::MAX {
        workers.insert(WorkerId::new(i.to_string()), ()).unwrap();
    }
    assert_eq!(
        workers.insert("one-too-many".into(), ()),
        Err(ClusterError::OutOfIndices)
    );
}
