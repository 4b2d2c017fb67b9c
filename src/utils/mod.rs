pub mod id;
#[cfg(test)]
pub mod test_utils;
pub mod tokens;
pub mod url;
