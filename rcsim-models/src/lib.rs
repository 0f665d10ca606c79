pub mod two_compartment;
