pub mod openevse;
pub mod openhab;
