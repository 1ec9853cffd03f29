//! # Utility Functions Module
//!
//! Helpers for building subprocess argument lists.

/// Collect string-like items into owned `String`s, ready for `Command::args`.
///
/// ```rust
/// # use dithery_doo::utils::to_string_vec;
/// let frames = 200;
/// let args = to_string_vec(["-frames:v", &frames.to_string(), "-y"]);
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Build an argument vector from values of one displayable type.
///
/// ```rust
/// # use dithery_doo::args;
/// let args = args!["-c:v", "ffv1", "-level:v", "3"];
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        $crate::utils::to_string_vec([$($item),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_string_vec() {
        let depth = 10;
        let result = to_string_vec(["-bits", &depth.to_string(), "-y"]);
        assert_eq!(result, vec!["-bits", "10", "-y"]);
        assert!(to_string_vec(Vec::<&str>::new()).is_empty());
    }

    #[test]
    fn test_args_macro() {
        let level = 3;
        assert_eq!(args!["-level:v", &level.to_string()], vec!["-level:v", "3"]);
        assert_eq!(args!["-c", "y4m", "-"], vec!["-c", "y4m", "-"]);
    }
}
