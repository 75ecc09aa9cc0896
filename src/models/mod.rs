pub mod bbox;
pub mod intent;
pub mod response;
pub mod stac;
