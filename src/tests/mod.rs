mod basic_tests;
mod edge_case_tests;
