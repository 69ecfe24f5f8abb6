pub mod init;
pub mod manager;
pub mod model;

pub use init::initialize;
pub use manager::{
    find_config_file, generate_default_config, load_config, save_config, validate_config_file,
    DEFAULT_CONFIG_FILENAME,
};
pub use model::{
    is_valid_server_name, BuildConfig, ClusterConfig, ContainerEnvConfig, NetworkConfig,
    NetworkNameConfig, ProxyConfig, RuntimeKind, ServerEntryConfig, StartOrder,
};
