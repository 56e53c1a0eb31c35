//! In-process tests for the channel: both endpoints live in this test
//! binary, which exercises exactly the same named resources two processes
//! would share.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tandem_ipc::{ChannelError, ChannelOptions, IpcChannel, NamingError, Role};
use tandem_shm::SharedMemory;

/// Short, unique base name per test so parallel tests never share resources.
fn unique_name(label: &str) -> String {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    format!("t{}{label}{n}", std::process::id())
}

fn pair(name: &str, channel: u32) -> (IpcChannel, IpcChannel) {
    let master = IpcChannel::new(name, channel, Role::Master).unwrap();
    let slave = IpcChannel::new(name, channel, Role::Slave).unwrap();
    (master, slave)
}

const SECOND: Option<Duration> = Some(Duration::from_secs(1));

#[test]
fn ping_reaches_the_slave() {
    let (mut master, mut slave) = pair(&unique_name("ping"), 0);
    master.send("ping").unwrap();
    assert_eq!(slave.receive(SECOND).unwrap().as_deref(), Some(&b"ping"[..]));
}

#[test]
fn traffic_flows_both_ways() {
    let (mut master, mut slave) = pair(&unique_name("duplex"), 0);
    slave.send(b"from slave".to_vec()).unwrap();
    master.send(String::from("from master")).unwrap();

    assert_eq!(master.receive(SECOND).unwrap().unwrap(), b"from slave");
    assert_eq!(slave.receive(SECOND).unwrap().unwrap(), b"from master");
}

#[test]
fn empty_payload_round_trips() {
    let (mut master, mut slave) = pair(&unique_name("empty"), 0);
    master.send("not empty").unwrap();
    master.send(b"").unwrap();
    assert_eq!(slave.receive(SECOND).unwrap(), Some(Vec::new()));
}

#[test]
fn receive_into_reuses_the_buffer() {
    let (mut master, mut slave) = pair(&unique_name("into"), 0);
    let mut buf = b"stale contents".to_vec();
    master.send("new").unwrap();
    assert!(slave.receive_into(&mut buf, SECOND).unwrap());
    assert_eq!(buf, b"new");
}

#[test]
fn large_payload_grows_the_segment() {
    let name = unique_name("big");
    let (mut master, mut slave) = pair(&name, 0);
    assert_eq!(slave.outbound_capacity(), 4096);

    let payload: Vec<u8> = (0..10 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    slave.send(&payload).unwrap();

    let received = master.receive(None).unwrap().unwrap();
    assert_eq!(received.len(), payload.len());
    assert!(received == payload);

    let capacity = slave.outbound_capacity();
    assert!(capacity >= payload.len() as u64);
    assert_eq!(capacity % 4096, 0);
    assert!((capacity / 4096).is_power_of_two());
    assert_eq!(capacity, 16 * 1024 * 1024);
    assert_eq!(master.inbound_capacity(), capacity);
}

#[test]
fn capacity_never_shrinks() {
    let (mut master, mut slave) = pair(&unique_name("mono"), 0);
    let mut last = master.outbound_capacity();

    for size in [10usize, 5_000, 100, 9_000, 20_000, 50, 70_000, 0] {
        let payload = vec![size as u8; size];
        master.send(&payload).unwrap();
        let cap = master.outbound_capacity();
        assert!(cap >= size as u64);
        assert!(cap >= last, "capacity shrank from {last} to {cap}");
        last = cap;

        assert_eq!(slave.receive(SECOND).unwrap().unwrap(), payload);
    }
    assert_eq!(last, 131_072);
}

#[test]
fn reader_rebinds_after_repeated_growth() {
    let (mut master, mut slave) = pair(&unique_name("rebind"), 0);

    master.send(vec![1u8; 100]).unwrap();
    assert_eq!(slave.receive(SECOND).unwrap().unwrap(), vec![1u8; 100]);

    // C1 -> C2 -> C3 without the slave reading in between.
    master.send(vec![2u8; 10_000]).unwrap();
    master.send(vec![3u8; 100_000]).unwrap();
    assert_eq!(slave.receive(SECOND).unwrap().unwrap(), vec![3u8; 100_000]);
    assert_eq!(slave.receive(SECOND).unwrap().unwrap(), vec![3u8; 100_000]);
    assert_eq!(slave.inbound_capacity(), 131_072);
}

#[test]
fn slow_receiver_sees_latest_payload_once_per_send() {
    let (mut master, mut slave) = pair(&unique_name("latest"), 0);
    for msg in ["one", "two", "three"] {
        master.send(msg).unwrap();
    }
    for _ in 0..3 {
        assert_eq!(slave.receive(SECOND).unwrap().unwrap(), b"three");
    }
    assert_eq!(slave.receive(Some(Duration::from_millis(20))).unwrap(), None);
}

#[test]
fn timeout_returns_nothing_and_consumes_nothing() {
    let (mut master, mut slave) = pair(&unique_name("tmo"), 0);

    let start = Instant::now();
    assert_eq!(slave.receive(Some(Duration::from_millis(100))).unwrap(), None);
    assert!(start.elapsed() >= Duration::from_millis(100));

    let mut buf = b"untouched".to_vec();
    assert!(!slave.receive_into(&mut buf, Some(Duration::from_millis(10))).unwrap());
    assert_eq!(buf, b"untouched");

    // The mutex was not left locked and the next send is still observable.
    master.send("late").unwrap();
    assert_eq!(slave.receive(SECOND).unwrap().unwrap(), b"late");
}

#[test]
fn blocking_receive_wakes_on_send() {
    let name = unique_name("block");
    let (master, mut slave) = pair(&name, 0);

    let sender = thread::spawn(move || {
        let mut master = master;
        thread::sleep(Duration::from_millis(50));
        master.send("woke").unwrap();
        master
    });

    assert_eq!(slave.receive(None).unwrap().unwrap(), b"woke");
    drop(sender.join().unwrap());
}

/// Payload for writer `w`, message `i`: one repeated byte, with a length
/// derived from that byte so truncation and interleaving are both visible.
fn tagged_payload(w: u8, i: u32) -> Vec<u8> {
    let byte = w * 100 + (i % 100) as u8;
    vec![byte; expected_len(byte)]
}

fn expected_len(byte: u8) -> usize {
    1_000 + byte as usize * 37
}

#[test]
fn concurrent_writers_never_interleave() {
    const PER_WRITER: u32 = 200;
    let name = unique_name("mutex");
    let mut slave = IpcChannel::new(&name, 0, Role::Slave).unwrap();

    let writers: Vec<_> = (0..2u8)
        .map(|w| {
            let mut master = IpcChannel::new(&name, 0, Role::Master).unwrap();
            thread::spawn(move || {
                for i in 0..PER_WRITER {
                    master.send(tagged_payload(w, i)).unwrap();
                }
                master
            })
        })
        .collect();

    for _ in 0..2 * PER_WRITER {
        let msg = slave
            .receive(Some(Duration::from_secs(5)))
            .unwrap()
            .expect("a send went missing");
        let byte = msg[0];
        assert!(msg.iter().all(|&b| b == byte), "payload bytes interleaved");
        assert_eq!(msg.len(), expected_len(byte), "payload truncated");
    }

    let masters: Vec<IpcChannel> = writers.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(slave.attached_endpoints(), 3);
    drop(masters);
}

#[test]
fn guarded_batch_posts_once_per_send() {
    let (mut master, mut slave) = pair(&unique_name("batch"), 0);
    {
        let mut guard = master.lock_outbound().unwrap();
        guard.send("a").unwrap();
        guard.send(vec![7u8; 9_000]).unwrap();
        assert_eq!(guard.capacity(), 16_384);
    }
    assert_eq!(slave.receive(SECOND).unwrap().unwrap(), vec![7u8; 9_000]);
    assert_eq!(slave.receive(SECOND).unwrap().unwrap(), vec![7u8; 9_000]);
    assert_eq!(slave.receive(Some(Duration::from_millis(10))).unwrap(), None);
}

#[test]
fn channel_numbers_are_independent() {
    let name = unique_name("mux");
    let (mut master0, mut slave0) = pair(&name, 0);
    let (mut master1, mut slave1) = pair(&name, 1);

    master0.send("zero").unwrap();
    master1.send("one").unwrap();
    assert_eq!(slave1.receive(SECOND).unwrap().unwrap(), b"one");
    assert_eq!(slave0.receive(SECOND).unwrap().unwrap(), b"zero");
    assert_eq!(slave0.receive(Some(Duration::from_millis(10))).unwrap(), None);
    assert_eq!(master0.channel_number(), 0);
    assert_eq!(master1.channel_number(), 1);
}

#[test]
fn creator_capacity_wins() {
    let name = unique_name("cap");
    let master = IpcChannel::with_options(
        ChannelOptions::new(&name, 0, Role::Master).initial_capacity(1 << 16),
    )
    .unwrap();
    let slave = IpcChannel::with_options(
        ChannelOptions::new(&name, 0, Role::Slave).initial_capacity(1024),
    )
    .unwrap();
    assert_eq!(master.outbound_capacity(), 1 << 16);
    assert_eq!(slave.outbound_capacity(), 1 << 16);
}

#[test]
fn last_endpoint_removes_every_name() {
    let name = unique_name("last");
    let (master, slave) = pair(&name, 0);
    let names = master.names().clone();
    assert_eq!(master.attached_endpoints(), 2);

    drop(master);
    assert!(SharedMemory::open(names.control()).is_ok());

    drop(slave);
    for shm in names.shared_memory() {
        let err = SharedMemory::open(shm).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound, "{shm} leaked");
    }
    assert_eq!(IpcChannel::remove(&name, 0).unwrap(), 0);
}

#[test]
fn remove_clears_names_left_by_a_dead_endpoint() {
    let name = unique_name("stale");
    let master = IpcChannel::new(&name, 0, Role::Master).unwrap();
    std::mem::forget(master);

    assert_eq!(IpcChannel::remove(&name, 0).unwrap(), 5);

    let (mut master, mut slave) = pair(&name, 0);
    assert_eq!(master.attached_endpoints(), 2);
    master.send("fresh").unwrap();
    assert_eq!(slave.receive(SECOND).unwrap().unwrap(), b"fresh");
}

#[test]
fn invalid_names_fail_construction() {
    let err = IpcChannel::new("bad/name", 0, Role::Master).unwrap_err();
    assert!(matches!(
        err,
        ChannelError::Naming(NamingError::InvalidCharacter { ch: '/' })
    ));
}

#[test]
fn foreign_control_segment_is_rejected() {
    let name = unique_name("junk");
    let ctl = format!("/{name}-0-ctl");
    let junk = SharedMemory::create(&ctl, 8192).unwrap();
    unsafe { (junk.as_ptr() as *mut u64).write(0xDEAD_BEEF) };

    let err = IpcChannel::new(&name, 0, Role::Slave).unwrap_err();
    assert!(matches!(err, ChannelError::Corrupt { .. }), "{err:?}");
    SharedMemory::unlink(&ctl).unwrap();
}

#[test]
fn failed_construction_removes_what_it_created() {
    let name = unique_name("half");
    let data = format!("/{name}-0-ms");
    let junk = SharedMemory::create(&data, 8192).unwrap();
    unsafe { (junk.as_ptr() as *mut u64).write(0xDEAD_BEEF) };

    let err = IpcChannel::new(&name, 0, Role::Master).unwrap_err();
    match err {
        ChannelError::Corrupt { resource, .. } => assert_eq!(resource, data),
        other => panic!("unexpected error: {other:?}"),
    }

    let ctl = format!("/{name}-0-ctl");
    let err = SharedMemory::open(&ctl).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound, "{ctl} leaked");
    assert_eq!(IpcChannel::remove(&name, 0).unwrap(), 0);

    // The names are free again for a working channel.
    let (mut master, mut slave) = pair(&name, 0);
    master.send("retry").unwrap();
    assert_eq!(slave.receive(SECOND).unwrap().unwrap(), b"retry");
}

#[test]
fn unpublished_control_segment_times_out() {
    let name = unique_name("hang");
    let ctl = format!("/{name}-0-ctl");
    let _never_published = SharedMemory::create(&ctl, 8192).unwrap();

    let start = Instant::now();
    let err = IpcChannel::with_options(
        ChannelOptions::new(&name, 0, Role::Master).attach_timeout(Duration::from_millis(50)),
    )
    .unwrap_err();
    assert!(start.elapsed() >= Duration::from_millis(50));
    match err {
        ChannelError::Construction { resource, source } => {
            assert_eq!(resource, ctl);
            assert_eq!(source.kind(), io::ErrorKind::TimedOut);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    SharedMemory::unlink(&ctl).unwrap();
}
