mod adapter;
mod session;
mod session_manager;

pub use adapter::TcpAdapter;
pub use session::{ConnectionState, ProtocolKind, SessionRole, SessionSnapshot, SocketHandle};
pub use session_manager::SessionManager;
