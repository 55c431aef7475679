pub mod audio;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod face;
pub mod fusion;
pub mod labels;
pub mod meter;
pub mod mfcc;
pub mod nn;
pub mod routes;
pub mod speech;
pub mod utils;

#[cfg(test)]
mod testing;
