//! In-process test rig: a fake document service and a peer driving an
//! engine against it.

pub mod peer;
pub mod remote;

pub use peer::{SequentialIds, TestPeer, first_of};
pub use remote::{FakeRemote, SPACE_ID, SPACE_VIEW_ID, USER_ID};

/// Route engine logs to the test writer. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
