// Sensors: ultrasonic ranger (GPIO) and grayscale line array (ADC)

pub mod grayscale;
pub mod ultrasonic;

pub use grayscale::{line_position, Grayscale};
pub use ultrasonic::Ultrasonic;
