pub mod signals;

pub use signals::{Shutdown, ShutdownTrigger, install_signal_handler, shutdown_channel};
