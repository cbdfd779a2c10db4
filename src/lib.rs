pub mod autostop;
pub mod config;
pub mod console;  // 콘솔 라인 매칭 / 핸들러 레지스트리 / 리더
pub mod operator;
pub mod protocol;
pub mod supervisor;
pub mod utils;

pub use autostop::IdleWatcher;
pub use config::ManagerConfig;
pub use console::PlayerList;
pub use supervisor::{ManagerError, ServerManager, ServerStatus};
