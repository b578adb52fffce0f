pub(crate) mod helpers;
mod properties;
mod scenarios;
