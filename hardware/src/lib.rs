//! The mount abstraction layer.
//!
//! One uniform set of operations (read attitude, rate slews, absolute slews,
//! tracking mode, cancel) over the concrete mount protocols: Celestron
//! NexStar hand-control, Sky-Watcher motor controllers over serial, the same
//! protocol over Wi-Fi UDP, a remote mount behind the RPC bridge, and an
//! in-memory simulator for hardware-out-of-the-loop runs. The adapter set is
//! closed and known at startup, so dispatch is a sum type rather than a
//! trait object.

pub mod channel;
pub mod io;
pub mod mount;
pub mod nexstar;
pub mod remote;
pub mod sim;
pub mod skywatcher;
pub mod wifi;

pub use io::MountHandle;
pub use mount::{Attitude, Axis, FrameKind, MountDevice, MountError, TrackingMode};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use crate::channel::Channel;
    use crate::mount::MountError;

    /// A channel that expects an exact command sequence and plays back
    /// canned responses.
    pub struct ScriptedChannel {
        script: VecDeque<(String, String)>,
    }

    impl ScriptedChannel {
        pub fn new(script: &[(&str, &str)]) -> Self {
            Self::owned(
                script
                    .iter()
                    .map(|(c, r)| (c.to_string(), r.to_string()))
                    .collect(),
            )
        }

        pub fn owned(script: Vec<(String, String)>) -> Self {
            Self {
                script: script.into(),
            }
        }

        pub fn finished(&self) -> bool {
            self.script.is_empty()
        }
    }

    impl Channel for ScriptedChannel {
        fn speak(&mut self, command: &str) -> Result<String, MountError> {
            let (expected, response) = self
                .script
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected command {command:?}"));
            assert_eq!(command, expected, "command out of sequence");
            Ok(response)
        }
    }
}
