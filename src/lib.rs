#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod analyse;
mod clock;
pub mod cpt;
pub mod error;
pub mod gene;
pub mod interaction;
pub mod io;
pub mod polytree;

pub use analyse::{Analysis, TransitionModel};
pub use cpt::Cpt;
pub use error::{Error, Result};
pub use gene::{Event, Gene, GeneTree, GeneTreeBuilder};
pub use interaction::{Interaction, InteractionGraph, InteractionKey};
pub use polytree::Polytree;
