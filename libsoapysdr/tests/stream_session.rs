use std::time::Duration;

use libsoapysdr::{
    mock, Complex, Device, Direction, Error, ErrorKind, Fault, Kwargs, StreamFlags, StreamState,
};

const TIMEOUT: Duration = Duration::from_millis(100);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn open() -> Device {
    init_tracing();
    Device::make_str(mock::abi(), "driver=mock").unwrap()
}

#[test]
fn continuous_receive_session() {
    let dev = open();
    let baseline = mock::live_allocations();
    {
        let mut rx = dev
            .setup_stream::<Complex<i8>>(Direction::Rx, &[0], &Kwargs::new())
            .unwrap();
        assert_eq!(rx.state(), StreamState::Configured);
        rx.activate(StreamFlags::NONE, 0, 0).unwrap();

        let mut bufs = [vec![Complex::<i8>::default(); 511]];
        let mut flags = [StreamFlags::NONE];
        let mut last_time = i64::MIN;
        let mut total = 0;
        for _ in 0..10 {
            let t = rx.read(&mut bufs, 511, &mut flags, TIMEOUT).unwrap();
            assert!(t.elements <= 511);
            if t.flags.contains(StreamFlags::HAS_TIME) {
                assert!(t.time_ns >= last_time);
                last_time = t.time_ns;
            }
            total += t.elements;
        }
        assert_eq!(total, 5110);

        rx.deactivate(StreamFlags::NONE, 0).unwrap();
        rx.close().unwrap();
        assert_eq!(rx.state(), StreamState::Closed);
    }
    assert_eq!(mock::live_allocations(), baseline);
}

#[test]
fn transfers_outside_active_are_rejected() {
    let dev = open();
    let mut rx = dev
        .setup_stream::<Complex<i8>>(Direction::Rx, &[0], &Kwargs::new())
        .unwrap();
    let mut bufs = [vec![Complex::<i8>::default(); 16]];
    let mut flags = [StreamFlags::NONE];

    let err = rx.read(&mut bufs, 16, &mut flags, TIMEOUT).unwrap_err();
    assert_eq!(
        err,
        Error::Fault(Fault::InvalidState {
            op: "read",
            state: StreamState::Configured
        })
    );

    rx.activate(StreamFlags::NONE, 0, 0).unwrap();
    rx.activate(StreamFlags::NONE, 0, 0).unwrap();
    assert_eq!(rx.state(), StreamState::Active);

    let err = rx.close().unwrap_err();
    assert!(matches!(err, Error::Fault(Fault::InvalidState { op: "close", .. })));
    assert_eq!(rx.state(), StreamState::Active);

    rx.deactivate(StreamFlags::NONE, 0).unwrap();
    rx.deactivate(StreamFlags::NONE, 0).unwrap();
    rx.close().unwrap();

    let closed = Error::Fault(Fault::InvalidState {
        op: "read",
        state: StreamState::Closed,
    });
    assert_eq!(rx.read(&mut bufs, 16, &mut flags, TIMEOUT).unwrap_err(), closed);
    assert!(rx.activate(StreamFlags::NONE, 0, 0).is_err());
    assert!(rx.deactivate(StreamFlags::NONE, 0).is_err());
    assert!(rx.close().is_err());
    assert!(rx.mtu().is_err());
}

#[test]
fn write_on_closed_transmit_stream_is_rejected() {
    let dev = open();
    let mut tx = dev
        .setup_stream::<Complex<i16>>(Direction::Tx, &[0, 1], &Kwargs::new())
        .unwrap();
    tx.close().unwrap();
    let bufs = [vec![Complex::<i16>::default(); 8], vec![Complex::default(); 8]];
    let mut flags = [StreamFlags::NONE; 2];
    let err = tx.write(&bufs, 8, &mut flags, 0, TIMEOUT).unwrap_err();
    assert!(matches!(
        err,
        Error::Fault(Fault::InvalidState {
            op: "write",
            state: StreamState::Closed
        })
    ));
}

#[test]
fn buffer_count_must_match_channel_count() {
    let dev = open();
    for channels in [vec![0], vec![0, 1, 2, 3]] {
        let n = channels.len();
        let mut rx = dev
            .setup_stream::<Complex<f32>>(Direction::Rx, &channels, &Kwargs::new())
            .unwrap();
        rx.activate(StreamFlags::NONE, 0, 0).unwrap();

        let mut too_many: Vec<Vec<Complex<f32>>> = vec![vec![Complex::default(); 32]; n + 1];
        let mut flags = vec![StreamFlags::NONE; n + 1];
        let err = rx.read(&mut too_many, 32, &mut flags, TIMEOUT).unwrap_err();
        assert_eq!(
            err,
            Error::Fault(Fault::ChannelCount {
                expected: n,
                actual: n + 1
            })
        );

        let mut exact: Vec<Vec<Complex<f32>>> = vec![vec![Complex::default(); 32]; n];
        let mut flags = vec![StreamFlags::NONE; n];
        let t = rx.read(&mut exact, 32, &mut flags, TIMEOUT).unwrap();
        assert_eq!(t.elements, 32);
        assert!(flags.iter().all(|f| *f == t.flags));
    }
}

#[test]
fn burst_ends_with_end_burst_then_times_out() {
    let dev = open();
    let mut rx = dev
        .setup_stream::<Complex<i8>>(Direction::Rx, &[1], &Kwargs::new())
        .unwrap();
    rx.activate(StreamFlags::NONE, 0, 300).unwrap();
    let mut bufs = [vec![Complex::<i8>::default(); 200]];
    let mut flags = [StreamFlags::NONE];

    let first = rx.read(&mut bufs, 200, &mut flags, TIMEOUT).unwrap();
    assert_eq!(first.elements, 200);
    assert!(!first.flags.contains(StreamFlags::END_BURST));
    let last = rx.read(&mut bufs, 200, &mut flags, TIMEOUT).unwrap();
    assert_eq!(last.elements, 100);
    assert!(last.flags.contains(StreamFlags::END_BURST));

    let err = rx.read(&mut bufs, 200, &mut flags, TIMEOUT).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Timeout));
    assert!(!err.is_fatal());
}
