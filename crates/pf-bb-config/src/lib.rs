//! pf_bb_config integration
//!
//! Everything the node daemon needs to drive the external baseband
//! configuration tool: the INI file it reads, the command socket it serves and
//! the FFT lookup tables VRB-class devices load.

pub mod error;
pub mod fft;
pub mod gateway;
pub mod ini;

pub use error::BbDevError;
pub use gateway::{GatewayClient, GatewayCommand, ResetMode};
pub use ini::{render_ini, write_ini};
