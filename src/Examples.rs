//! examples of usage of RustedIVP
/// IVP with events, ensembles and configuration
pub mod ivp_examples;
