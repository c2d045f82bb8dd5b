//! # Zenith Runtime
//!
//! Server-side engine for stateful component pages.
//!
//! ## Request Model
//!
//! 1. **Pages**: a page is a tree of component occurrences rooted at one
//!    component. Pages live in the session's page cache between exchanges.
//!
//! 2. **Element Ids**: every occurrence is addressed by its dotted position
//!    in the walk (`1.2.3`). The same cursor replays the same ids in every
//!    phase, so submitted values and action senders find their node again.
//!
//! 3. **Phases**: one exchange runs apply-values, then invoke-action once
//!    per sender, then render. An action that names a page switches to it.
//!
//! 4. **Bindings**: template attributes parse into bindings that read and
//!    write keys on the component whose template declares the occurrence.
//!
//! 5. **Instances**: stateful components persist in the page by element id.
//!    Stateless components are pooled per occurrence or shared per class, and
//!    never keep bindings past a shared checkin.

mod application;
pub mod binding;
mod builtin;
mod component;
mod config;
mod definition;
mod element_id;
mod error;
mod fields;
mod localization;
mod page;
mod pool;
mod reference;
mod request;
mod session;
mod template;
mod validate;
mod value;
mod walk;

#[cfg(test)]
mod binding_tests;

pub use application::Application;
pub use binding::{Binding, ConstantOrigin, Formatter, Frame, ParseEnv, Scope};
pub use builtin::{Checkbox, Conditional, Download, Hyperlink, Repetition, StringElement, TextField};
pub use component::{AsAny, Component, Iterations, Phase, PhaseContext};
pub use config::RuntimeConfig;
pub use definition::{
    BindingRequirements, ComponentClass, ComponentDefinition, ComponentKind, Pooling, SharedSlot,
};
pub use element_id::{
    ElementIdCursor, ElementIdGenerator, ElementIdPath, NoOpCursor, TracingCursor,
};
pub use error::{BindingError, PhaseOutcome, RuntimeError, RuntimeResult};
pub use fields::{AccessError, Accessor, FieldTable, FieldTableBuilder};
pub use localization::{
    next_resource_identity, LocaleStrings, Localization, ResourceManager, StringTables,
};
pub use page::Page;
pub use pool::{Checkout, InstancePool, PoolStats};
pub use reference::ComponentReference;
pub use request::{
    Environment, FieldError, Request, RequestContext, Response, ResponseStatus,
};
pub use session::{Session, SessionState};
pub use template::{Template, TemplateNode, TemplateSource};
pub use validate::{Direction, ValidationContext, ValidationRecord};
pub use value::Value;
