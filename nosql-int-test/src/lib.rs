pub mod contract;
pub mod test_util;
