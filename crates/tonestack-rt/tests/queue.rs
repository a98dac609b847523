use tonestack_rt::queue::QueueError;
use tonestack_rt::EventQueue;

#[test]
fn push_and_pop() {
    let queue = EventQueue::new(2);
    queue.try_push(1usize).unwrap();
    queue.try_push(2usize).unwrap();
    assert!(matches!(queue.try_push(3usize), Err(QueueError::Full)));
    assert_eq!(queue.try_pop().unwrap(), 1);
    assert_eq!(queue.try_pop().unwrap(), 2);
    assert!(matches!(queue.try_pop(), Err(QueueError::Empty)));
}

#[test]
fn drains_across_threads() {
    let queue = EventQueue::new(64);
    let producer = queue.clone();
    let handle = std::thread::spawn(move || {
        for i in 0..64usize {
            producer.try_push(i).unwrap();
        }
    });
    handle.join().unwrap();

    let mut drained = Vec::new();
    while let Ok(value) = queue.try_pop() {
        drained.push(value);
    }
    assert_eq!(drained, (0..64).collect::<Vec<_>>());
    assert!(queue.is_empty());
}
