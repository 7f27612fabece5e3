//! # pmosoap - runtime SOAP/XML
//!
//! Cette crate transporte un message structuré depuis un appel applicatif,
//! à travers une chaîne d'étapes de traitement, jusqu'à un encodage sur le
//! fil et un transport, puis retour. Elle sert aussi bien côté client que
//! côté serveur.
//!
//! # Organisation
//!
//! - [`message`] : message SOAP (en-têtes, contenu lu une seule fois,
//!   pièces jointes, propriétés) et faults
//! - [`codec`] : encodages SOAP 1.1/1.2, XML brut, MTOM/XOP et SwA
//! - [`pipeline`] : étapes de traitement, copie structurelle des chaînes,
//!   réserve de copies et étapes fournies
//! - [`transport`] : résolution différée du transport selon l'adresse,
//!   transports `local://` et HTTP (fonctionnalité `http`)
//! - [`endpoint`] : endpoint serveur et registre d'objets exportés
//! - [`settings`], [`SoapConfigExt`] et [`logging`] : réglages chargés
//!   depuis `pmoconfig` et initialisation de `tracing`
//!
//! # Concurrence
//!
//! Codecs et pipelines ne sont pas réentrants. Chaque unité d'exécution
//! travaille sur sa propre copie ([`codec::Codec::copy`],
//! [`pipeline::Pipeline::copy`]) ; seul le [`endpoint::StatefulRegistry`]
//! est partagé et verrouillé.
//!
//! # Exemple
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use pmosoap::{SoapConfigExt, binding::Binding};
//! use pmosoap::pipeline::{AssemblyContext, client_recipe};
//! use pmosoap::transport::TransportRegistry;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = get_config();
//! let settings = config.get_soap_settings()?;
//! let binding = config.get_soap_binding()?;
//!
//! let context = AssemblyContext::new(binding, settings, TransportRegistry::with_defaults());
//! let mut client = client_recipe().build(&context)?;
//! # let _ = &mut client;
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod codec;
pub mod config_ext;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod message;
pub mod pipeline;
pub mod settings;
pub mod transport;
pub mod version;
pub mod xml;

pub use binding::{Binding, OperationInfo};
pub use config_ext::SoapConfigExt;
pub use error::{DecodeError, EncodeError, MessageError, PipelineError, TransportError, XmlError};
pub use message::{Message, SoapFault};
pub use settings::RuntimeSettings;
pub use version::SoapVersion;
