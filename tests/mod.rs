//! Test suite for garage-sync
//!
//! This module organizes all tests
