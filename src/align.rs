/// Rounds `value` up to the next multiple of `align`, which must be a power
/// of two.
///
/// # Examples
///
/// ```rust
/// use tagalloc::align;
///
/// assert_eq!(align!(13, 8), 16);
/// assert_eq!(align!(16, 8), 16);
/// assert_eq!(align!(1, 4096), 4096);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr, $align:expr) => {
    (($value) + ($align) - 1) & !(($align) - 1)
  };
}
