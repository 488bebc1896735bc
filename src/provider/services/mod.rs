//! Provider services.

mod gateway;
mod stream;

pub use gateway::{Embedded, Generation, ModelGateway, ProviderError, ProviderResult};
pub use stream::ResponseStream;
