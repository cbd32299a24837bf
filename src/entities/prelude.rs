#![allow(unused_imports)]

pub use super::faucet_request::Entity as FaucetRequest;
