mod dhsl;

pub use dhsl::{DhslModel, DhslParameters, ModelError};
