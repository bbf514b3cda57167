// PiCar-X runtime: capability layer, actuators, sensors, controller and servers

pub mod camera;
pub mod config;
pub mod device;
pub mod hal;
pub mod messages;
pub mod motor;
pub mod robot;
pub mod runtime;
pub mod sensor;
pub mod server;
