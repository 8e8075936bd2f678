//! A8RS - Atari 8-bit Computer Emulator in Rust
//!
//! An Atari 800XL emulator core supporting:
//! - 6502 CPU with PC hooks and DMA / WSYNC stalls
//! - ANTIC display lists, GTIA players/missiles and priority
//! - POKEY audio, timers, serial I/O and paddles
//! - SIO disk drives with ATR images
//! - H: virtual filesystem device

pub mod cpu;
pub mod memory;
pub mod events;
pub mod antic;
pub mod gtia;
pub mod pokey;
pub mod pia;
pub mod disk;
pub mod hdevice;
pub mod input;
pub mod atari;
pub mod config;
pub mod error;
pub mod trace;

pub use atari::Atari800;
pub use error::A8Error;
