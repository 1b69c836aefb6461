pub mod cli;
pub mod clock;
pub mod crypto;
pub mod hash;
pub mod random;
