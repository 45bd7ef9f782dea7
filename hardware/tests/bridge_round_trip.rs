//! The tracker-side remote mount against the bridge-side dispatcher,
//! connected by a real TCP socket.

use std::sync::Arc;

use approx::assert_relative_eq;
use hardware::mount::{Axis, FrameKind, MountDevice, MountError, TrackingMode};
use hardware::remote::{self, RemoteMount};
use hardware::sim::SimMount;

struct Harness {
    sim: SimMount,
    _guard: rpc::ServerGuard,
    remote: RemoteMount,
    handle: hardware::MountHandle,
}

fn harness(frame: FrameKind) -> Harness {
    let sim = SimMount::new(frame);
    let (handle, _thread) = hardware::io::spawn(MountDevice::Sim(sim.clone()));

    let server = rpc::RpcServer::bind("127.0.0.1:0").unwrap();
    let dispatch_handle = handle.clone();
    let guard = server
        .spawn(Arc::new(move |method: &str, params| {
            remote::dispatch(&dispatch_handle, method, params)
        }))
        .unwrap();

    let remote = RemoteMount::connect(&guard.addr().to_string()).unwrap();
    Harness {
        sim,
        _guard: guard,
        remote,
        handle,
    }
}

#[test]
fn attitude_and_rates_cross_the_bridge() {
    let mut h = harness(FrameKind::AltAz);
    assert_eq!(h.remote.frame_kind(), FrameKind::AltAz);
    assert_relative_eq!(h.remote.max_slew_rate(), SimMount::MAX_SLEW_RATE);

    h.remote.slew_rate(Axis::Primary, 0.2).unwrap();
    h.sim.advance(1.0);
    let attitude = h.remote.read_attitude().unwrap();
    assert_relative_eq!(attitude.axis1, 0.2, epsilon = 1e-6);

    h.remote.slew_to(Axis::Secondary, 0.3).unwrap();
    h.sim.advance(10.0);
    let attitude = h.remote.read_attitude().unwrap();
    assert_relative_eq!(attitude.axis2, 0.3, epsilon = 1e-6);

    h.remote.set_tracking_mode(TrackingMode::Off).unwrap();
    h.remote.cancel().unwrap();
    assert_eq!(h.sim.command_log().cancels, 1);

    h.handle.shutdown();
}

#[test]
fn unknown_method_maps_to_unsupported() {
    let h = harness(FrameKind::AltAz);
    // Reach under the covers: a raw client calling a method the bridge does
    // not implement gets the Unsupported error kind.
    let mut raw = rpc::RpcClient::new(&h._guard.addr().to_string());
    match raw.call("plate_solve", serde_json::Value::Null) {
        Err(rpc::RpcError::Remote { kind, .. }) => {
            assert_eq!(kind, rpc::ErrorKind::Unsupported);
        }
        other => panic!("expected unsupported, got {other:?}"),
    }
    h.handle.shutdown();
}

#[test]
fn transport_loss_is_not_retried_silently() {
    let mut h = harness(FrameKind::AltAz);
    h.remote.slew_rate(Axis::Primary, 0.1).unwrap();

    let addr = h._guard.addr();
    drop(h._guard);
    // Give the connection thread time to notice the stop flag.
    std::thread::sleep(std::time::Duration::from_millis(500));

    let result = h.remote.read_attitude();
    assert!(matches!(result, Err(MountError::Transport(_))), "{result:?}");
    let _ = addr;
    h.handle.shutdown();
}
