//! # keyward
//!
//! Client-side authentication sessions.
//!
//! keyward sits between an application, an external identity provider and
//! the application's own backend. It signs people in through the provider,
//! trades the provider's token for a backend-acknowledged session, keeps
//! checking that session in the background, and attaches its credential to
//! every outbound API call, ending the session when authentication can no
//! longer be trusted.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use keyward::prelude::*;
//! use keyward_provider::MemoryProvider;
//!
//! # async fn demo() -> Result<(), KeywardError> {
//! let config = KeywardConfig::from_env().validated();
//! let provider = Arc::new(MemoryProvider::new(Duration::from_secs(3600)));
//! let backend = HttpBackend::new(&config.backend_url, &config.exchange_path, config.call_timeout)?;
//! let transport = HttpTransport::new(&config.backend_url, config.request_timeout)?;
//!
//! let controller = SessionController::builder(provider, backend)
//!     .config(config)
//!     .build();
//! let _events = controller.watch_auth_state();
//!
//! let session = controller.login("ada@example.com", "secret1").await?;
//! let api = RequestAuthorizer::new(controller.clone(), transport);
//! let response = api.send(ApiRequest::get("/subjects")).await?;
//! # let _ = (session, response);
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! | Crate | Concern |
//! |---|---|
//! | `keyward-protocol` | exchange and error bodies, ids, codec |
//! | `keyward-provider` | the identity provider boundary |
//! | `keyward-transport` | backend exchange and outbound calls |
//! | `keyward-session` | session store, durable mirror, token validation |
//! | `keyward-refresh` | background revalidation timer |
//! | `keyward` | controller, authorizer, config, logging |

mod authorizer;
mod config;
mod controller;
mod error;
mod reconcile;
pub mod telemetry;

pub use authorizer::RequestAuthorizer;
pub use config::KeywardConfig;
pub use controller::{AuthStateSubscription, SessionController, SessionControllerBuilder};
pub use error::KeywardError;

pub mod prelude {
    pub use crate::telemetry::LogFormat;
    pub use crate::{
        AuthStateSubscription, KeywardConfig, KeywardError, RequestAuthorizer, SessionController,
    };
    pub use keyward_protocol::{Generation, SubjectId};
    pub use keyward_provider::{AuthStateEvent, IdentityProvider, ProviderIdentity};
    pub use keyward_session::{AuthError, Session, SessionMirror, ValidationResult};
    pub use keyward_transport::{ApiRequest, ApiResponse, ApiTransport, ExchangeBackend, Method};
    #[cfg(feature = "http")]
    pub use keyward_transport::{HttpBackend, HttpTransport};
}
