pub mod crypto;
pub mod errors;
pub mod key_pool;
pub mod model_registry;
pub mod playground;
pub mod proxy_engine;
pub mod upstream_client;

pub use crypto::{AesGcmEncryption, CryptoError, EncryptionService, PlainEncryption};
pub use errors::{CoreError, CoreResult};
pub use key_pool::{KeyPool, ValidationOutcome};
pub use model_registry::ModelRegistry;
pub use playground::{ChatMessage, PlaygroundExecutor, PlaygroundReply, PlaygroundRequest};
pub use proxy_engine::{InboundRequest, ProxyEngine};
pub use upstream_client::{UpstreamClientConfig, WreqUpstreamClient};
