//! # Module Endpoint - objets serveur adressables
//!
//! Un serveur peut remettre au client une référence ([`EndpointReference`])
//! vers une instance précise plutôt que vers le service entier. Le
//! [`StatefulRegistry`] associe ces références aux objets vivants et route
//! les appels suivants vers la bonne instance.
//!
//! L'adresse d'une référence exportée est celle sous laquelle le client a
//! joint le serveur ; elle est transmise explicitement par un
//! [`RequestContext`].
//!
//! ## Exemple
//!
//! ```rust
//! use pmosoap::endpoint::{RequestContext, StatefulRegistry};
//! use pmosoap::message::Message;
//! use pmosoap::version::SoapVersion;
//!
//! let registry = StatefulRegistry::new("Counter");
//! let context = RequestContext::new("http://localhost:8080/counter");
//! let epr = registry.export(42u32, &context);
//!
//! let mut call = Message::empty().with_version(SoapVersion::Soap12);
//! epr.prepare(&mut call, SoapVersion::Soap12);
//! assert_eq!(*registry.resolve(&mut call).unwrap(), 42);
//! ```

mod reference;
mod registry;
mod server;

pub use reference::{EndpointReference, OBJECT_ID};
pub use registry::{Drainable, RequestContext, StatefulRegistry};
pub use server::{ServerEndpoint, ServerRequest, ServerResponse};
