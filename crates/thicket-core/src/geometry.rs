use std::ops::Mul;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size<T> {
    pub width: T,
    pub height: T,
}

impl<T> Size<T> {
    pub fn new(width: T, height: T) -> Self {
        Size { width, height }
    }

    pub fn cast<U: From<T>>(self) -> Size<U> {
        Size {
            width: U::from(self.width),
            height: U::from(self.height),
        }
    }
}

impl<T: Ord + Copy> Size<T> {
    /// The longer of the two sides.
    pub fn max_side(&self) -> T {
        self.width.max(self.height)
    }
}

impl<T: Mul + Copy> Mul<T> for Size<T> {
    type Output = Size<<T as Mul>::Output>;

    fn mul(self, rhs: T) -> Self::Output {
        Size {
            width: self.width * rhs,
            height: self.height * rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_side() {
        assert_eq!(Size::new(1920u32, 1080).max_side(), 1920);
        assert_eq!(Size::new(600u32, 800).max_side(), 800);
    }

    #[test]
    fn test_scale() {
        let size = Size::new(4u32, 2) * 2;
        assert_eq!(size, Size::new(8, 4));
    }
}
