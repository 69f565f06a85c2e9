//! Product selection for resize tests.
//!
//! A candidate is larger only if it has more compute or more memory and,
//! in addition, more primary storage; smaller is the attribute-wise dual.
//! The first qualifying candidate in catalog order wins. `None` means the
//! environment has no usable catalog for the assertion, which callers treat
//! as test invalidity rather than a driver defect.

use pcv_core::Product;

/// Direction of a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeDirection {
    Larger,
    Smaller,
}

/// Pick the first product strictly larger than `current`.
#[must_use]
pub fn select_larger<'a, I>(current: &Product, catalog: I) -> Option<&'a Product>
where
    I: IntoIterator<Item = &'a Product>,
{
    select(current, catalog, ResizeDirection::Larger)
}

/// Pick the first product strictly smaller than `current`.
#[must_use]
pub fn select_smaller<'a, I>(current: &Product, catalog: I) -> Option<&'a Product>
where
    I: IntoIterator<Item = &'a Product>,
{
    select(current, catalog, ResizeDirection::Smaller)
}

/// Pick the first product in `direction` relative to `current`, skipping
/// catalog entries with the current product's identifier.
#[must_use]
pub fn select<'a, I>(current: &Product, catalog: I, direction: ResizeDirection) -> Option<&'a Product>
where
    I: IntoIterator<Item = &'a Product>,
{
    catalog
        .into_iter()
        .filter(|candidate| candidate.id != current.id)
        .find(|candidate| match direction {
            ResizeDirection::Larger => candidate.is_larger_than(current),
            ResizeDirection::Smaller => candidate.is_smaller_than(current),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<Product> {
        vec![
            Product::new("A", 1, 1, 10),
            Product::new("B", 2, 1, 20),
            Product::new("C", 1, 2, 5),
        ]
    }

    #[test]
    fn picks_larger_with_more_storage() {
        let catalog = catalog();
        let current = &catalog[0];
        assert_eq!(select_larger(current, &catalog).map(|p| p.id.as_str()), Some("B"));
        assert_eq!(select_smaller(current, &catalog), None);
    }

    #[test]
    fn never_returns_current_identifier() {
        // Same identifier with a larger shape must still be skipped.
        let current = Product::new("A", 1, 1, 10);
        let catalog = vec![Product::new("A", 4, 4, 40), Product::new("D", 4, 4, 40)];
        assert_eq!(select_larger(&current, &catalog).map(|p| p.id.as_str()), Some("D"));
    }

    #[test]
    fn first_match_wins() {
        let current = Product::new("M", 2, 2048, 40);
        let catalog = vec![
            Product::new("XL", 8, 8192, 160),
            Product::new("L", 4, 4096, 80),
            Product::new("S", 1, 1024, 20),
            Product::new("XS", 1, 512, 10),
        ];
        assert_eq!(select_larger(&current, &catalog).map(|p| p.id.as_str()), Some("XL"));
        assert_eq!(select_smaller(&current, &catalog).map(|p| p.id.as_str()), Some("S"));
    }

    #[test]
    fn smaller_requires_less_storage() {
        let current = Product::new("M", 2, 2048, 40);
        let catalog = vec![Product::new("fewer-cpus-same-disk", 1, 2048, 40)];
        assert_eq!(select_smaller(&current, &catalog), None);
    }
}
