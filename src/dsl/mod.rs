//! The DSL fusion front-end: [`word::DslWord`], the concrete words in
//! [`words`], and their runtime composition in [`fusion`].

pub mod fusion;
pub mod word;
pub mod words;

pub use word::{BindContext, DslWord, GetContext, GetValue, GroupDescriptor};
