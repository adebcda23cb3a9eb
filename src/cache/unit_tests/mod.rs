mod harness;

#[cfg(test)]
mod controller_tests;
