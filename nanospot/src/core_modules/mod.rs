pub mod calibration;
pub mod feature_extractor;
pub mod glyphs;
pub mod overlay;
pub mod proximity;
pub mod region;
pub mod spatial;
