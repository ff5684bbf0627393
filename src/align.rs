//! Page-size alignment helpers.
//!
//! The OS page size (and, on Windows, the allocation granularity) is queried
//! once and cached process-wide. It is a pure, immutable value, so a
//! `Lazy` is enough - no further synchronization is needed beyond
//! first-use initialization.

use once_cell::sync::Lazy;

use crate::os;

/// The cached page size / allocation granularity, queried from the OS on
/// first use.
pub static PAGE_SIZE: Lazy<usize> = Lazy::new(os::get_alignment);

/// Rounds `len` up to the next multiple of the page size.
pub fn align_up(len: usize) -> usize {
    let page_size = *PAGE_SIZE;
    let offset = len % page_size;
    len + if offset > 0 { page_size - offset } else { 0 }
}

/// Rounds `len` down to the previous multiple of the page size.
pub fn align_down(len: usize) -> usize {
    let page_size = *PAGE_SIZE;
    (len / page_size) * page_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        let page_size = os::get_alignment();
        assert_eq!(align_up(1), page_size);
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(page_size), page_size);
        assert_eq!(align_up(page_size + 1), 2 * page_size);

        assert_eq!(align_down(1), 0);
        assert_eq!(align_down(0), 0);
        assert_eq!(align_down(page_size), page_size);
        assert_eq!(align_down(page_size + 1), page_size);
    }
}
