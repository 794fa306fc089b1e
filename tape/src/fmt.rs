//! Display adapters for heterogeneous tuples.
//!
//! [`Tuple`] wraps any tuple whose elements implement [`Display`] and prints
//! it as `(elem1, elem2, ...)`. Implemented for arities 0 through 12.
//!
//! Nested tuples are printed by wrapping the inner tuple in [`Tuple`] as
//! well, since the wrapper itself implements [`Display`]:
//!
//! ```
//! use tape::fmt::Tuple;
//!
//! let row = Tuple((1, "IBM", Tuple((101.25, 500_000))));
//! assert_eq!(row.to_string(), "(1, IBM, (101.25, 500000))");
//! ```

use std::fmt::{self, Display, Formatter};

/// Wrapper that prints a tuple in `(a, b, c)` form.
pub struct Tuple<T>(pub T);

/// Element-wise formatting for tuple types. Implemented via macro for
/// tuples up to arity 12; not intended for manual implementation.
pub trait TupleFields {
    fn fmt_fields(&self, f: &mut Formatter<'_>) -> fmt::Result;
}

impl<T: TupleFields> Display for Tuple<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        self.0.fmt_fields(f)?;
        f.write_str(")")
    }
}

impl TupleFields for () {
    fn fmt_fields(&self, _f: &mut Formatter<'_>) -> fmt::Result {
        Ok(())
    }
}

macro_rules! tuple_fields {
    ($(($($T:ident $idx:tt),+);)+) => {
        $(
            impl<$($T: Display),+> TupleFields for ($($T,)+) {
                fn fmt_fields(&self, f: &mut Formatter<'_>) -> fmt::Result {
                    $(
                        if $idx != 0 {
                            f.write_str(", ")?;
                        }
                        Display::fmt(&self.$idx, f)?;
                    )+
                    Ok(())
                }
            }
        )+
    };
}

tuple_fields! {
    (A 0);
    (A 0, B 1);
    (A 0, B 1, C 2);
    (A 0, B 1, C 2, D 3);
    (A 0, B 1, C 2, D 3, E 4);
    (A 0, B 1, C 2, D 3, E 4, F 5);
    (A 0, B 1, C 2, D 3, E 4, F 5, G 6);
    (A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
    (A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8);
    (A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9);
    (A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10);
    (A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10, L 11);
}
