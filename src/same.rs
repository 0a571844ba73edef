//! Comparison used when replaying recorded reads.
//!
//! Plain values compare by value. Shared handles (`Rc`, `Arc`, topics)
//! compare by identity, so replacing a shared object with an equal copy
//! still counts as a change. Containers of those compare element-wise.
//!
//! Types that need something else can be read with
//! [`Topic::read_with`](crate::Topic::read_with) and an explicit comparer,
//! or through `#[observe(compare = path)]` on a derived field.

use std::{rc::Rc, sync::Arc};

pub trait Same {
    fn same(&self, other: &Self) -> bool;
}

macro_rules! same_by_eq {
    ($($t:ty),* $(,)?) => {
        $(
            impl Same for $t {
                #[inline]
                fn same(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

same_by_eq!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    str,
    String,
    &'static str,
    std::time::Duration,
);

impl Same for f32 {
    #[inline]
    fn same(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl Same for f64 {
    #[inline]
    fn same(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl<T: ?Sized> Same for Rc<T> {
    #[inline]
    fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: ?Sized> Same for Arc<T> {
    #[inline]
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: Same> Same for Option<T> {
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: Same, E: Same> Same for Result<T, E> {
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Ok(a), Ok(b)) => a.same(b),
            (Err(a), Err(b)) => a.same(b),
            _ => false,
        }
    }
}

impl<T: Same> Same for [T] {
    fn same(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same(b))
    }
}

impl<T: Same, const N: usize> Same for [T; N] {
    fn same(&self, other: &Self) -> bool {
        self.as_slice().same(other.as_slice())
    }
}

impl<T: Same> Same for Vec<T> {
    fn same(&self, other: &Self) -> bool {
        self.as_slice().same(other.as_slice())
    }
}

macro_rules! same_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Same),+> Same for ($($name,)+) {
            fn same(&self, other: &Self) -> bool {
                $(self.$idx.same(&other.$idx))&&+
            }
        }
    };
}

same_tuple!(A: 0);
same_tuple!(A: 0, B: 1);
same_tuple!(A: 0, B: 1, C: 2);
same_tuple!(A: 0, B: 1, C: 2, D: 3);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_handles_compare_by_identity() {
        let a = Rc::new(String::from("x"));
        let b = Rc::new(String::from("x"));
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
    }

    #[test]
    fn test_nan_is_same_as_itself() {
        assert!(f64::NAN.same(&f64::NAN));
        assert!(!0.0f64.same(&-0.0f64));
    }

    #[test]
    fn test_containers_compare_elementwise() {
        assert!(vec![Some(1), None].same(&vec![Some(1), None]));
        assert!(!vec![1, 2].same(&vec![1, 2, 3]));
        assert!((1u8, "a").same(&(1u8, "a")));
    }
}
