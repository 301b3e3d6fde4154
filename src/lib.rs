//! Compiles intermediate flow descriptions into validated, dependency-ordered
//! executable flow graphs.

pub mod bind;
pub mod compare;
pub mod compile;
pub mod config;
pub mod construct;
pub mod context;
pub mod error;
pub mod ir;
pub mod lower;
pub mod parse;
pub mod resolve;
pub mod validate;

pub use compile::{Checked, Compiler};
pub use config::CompilerOptions;
pub use construct::capability::{
    AddressResolver, BoxError, Client, CodecConstructor, CodecManager, Discovery,
    MethodDescriptor, StaticResolver, Transport,
};
pub use construct::registry::{Capabilities, Registry};
pub use context::Context;
pub use error::{CompilerError, ErrorKind, Phase};
pub use ir::CompiledFlow;
pub use parse::{Manifest, parse_manifest};
pub use resolve::function::{Function, Functions};
