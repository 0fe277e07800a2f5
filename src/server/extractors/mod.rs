mod relay_authentication_extractor;

pub use relay_authentication_extractor::*;
