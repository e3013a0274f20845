pub mod actuator;
pub mod journal;
pub mod sensor;
