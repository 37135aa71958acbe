/// Halving step of the fork-join recursions.
pub(crate) trait SplitAtHalf: Sized {
    /// Split into a left half of `len / 2` elements and the rest.
    fn split_at_half(self) -> (Self, Self);
}

impl<T> SplitAtHalf for Vec<T> {
    #[inline]
    fn split_at_half(mut self) -> (Self, Self) {
        let right = self.split_off(self.len() / 2);
        (self, right)
    }
}
