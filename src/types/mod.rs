//! Binary encoding primitives shared by the instruction codec and the image format.

pub mod encoding;
