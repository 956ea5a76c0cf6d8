pub mod settings_operations;
pub mod swap_operations;
pub mod system_operations;
pub mod wallet_operations;

pub use settings_operations::SettingsOperations;
pub use swap_operations::SwapOperations;
pub use system_operations::SystemOperations;
pub use wallet_operations::WalletOperations;
