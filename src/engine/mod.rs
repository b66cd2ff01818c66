pub mod device;
pub mod instruction;
pub mod leak;
pub mod system;
pub mod tracked;

pub use device::*;
pub use instruction::*;
pub use leak::*;
pub use tracked::*;
