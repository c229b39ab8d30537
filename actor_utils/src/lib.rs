pub mod event;
pub mod messaging;
pub mod shared_blockstore;
pub mod syscalls;
pub mod util;
