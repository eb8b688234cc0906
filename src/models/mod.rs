pub mod autoencoder;
pub mod base_model;
pub mod layers;
pub mod trainer;
