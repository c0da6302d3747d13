//! Test utilities for assembling and running programs.
