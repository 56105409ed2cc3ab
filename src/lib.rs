//! An interpreter for 32-bit x86 machine code running in a flat address
//! space.
//!
//! `flat86` executes a raw binary image without an operating system: there is
//! no segmentation, no paging and no privilege model. Guest addresses index
//! directly into a [`FlatMemory`] buffer, and the only way for a program to
//! talk to the outside world is through port I/O and software interrupts,
//! which are forwarded to an [`IoBus`] supplied by the embedder.
//!
//! ```
//! use flat86::cpu::{Interpreter, State};
//! use flat86::io::NullBus;
//! use flat86::memory::FlatMemory;
//!
//! // mov eax,1 ; add eax,2 ; hlt
//! let code = [0xB8, 0x01, 0x00, 0x00, 0x00, 0x05, 0x02, 0x00, 0x00, 0x00, 0xF4];
//! let mut mem = FlatMemory::new(0x10000);
//! mem.load_image(0x1000, &code).unwrap();
//!
//! let mut int = Interpreter::new(mem, State::new(0x1000, 0x8000), Box::new(NullBus));
//! assert_eq!(int.run().unwrap(), 3);
//! assert_eq!(int.state().eax(), 3);
//! ```
//!
//! [`FlatMemory`]: memory/struct.FlatMemory.html
//! [`IoBus`]: io/trait.IoBus.html

#![doc(html_root_url = "https://docs.rs/flat86/0.1.0")]
#![warn(missing_debug_implementations)]

#[macro_use] extern crate bitflags;
#[macro_use] extern crate bitpat;
#[macro_use] extern crate log;
#[macro_use] extern crate num_derive;
extern crate num_traits;

pub mod cpu;
pub mod io;
pub mod memory;
mod utils;
