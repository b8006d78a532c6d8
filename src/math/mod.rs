pub mod averaging;
pub mod eddy_flux;


pub use averaging::*;
pub use eddy_flux::*;
