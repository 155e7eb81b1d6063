//! # Lazy Dimensions
//!
//! Lengths in the layout tree are expressions, not numbers. A container's
//! height may be "page height minus float region minus footnote region"
//! where the float and footnote parts are literals that grow while the page
//! renders. Evaluating a `Dim` reads the expression at that moment; growing
//! a literal is visible to every expression that references it the next
//! time it is evaluated, and never retroactively corrects a value a caller
//! has already consumed.
//!
//! The base unit is the printer's point (1/72 inch). Handles are cheap to
//! clone and share their node, so the same literal can appear in many
//! expressions.

use std::cell::RefCell;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::rc::Rc;

const MM_PER_PT: f64 = 25.4 / 72.0;

/// A shared, lazily-evaluated length expression.
#[derive(Clone)]
pub struct Dim(Rc<RefCell<Expr>>);

enum Expr {
    /// A concrete length in points. The only growable node.
    Literal(f64),
    Sum(Dim, Dim),
    Diff(Dim, Dim),
    Scale(Dim, f64),
}

impl Dim {
    fn new(expr: Expr) -> Self {
        Dim(Rc::new(RefCell::new(expr)))
    }

    /// A literal length in points.
    pub fn pt(v: f64) -> Self {
        Dim::new(Expr::Literal(v))
    }

    /// A literal length in millimeters.
    pub fn mm(v: f64) -> Self {
        Dim::pt(v / MM_PER_PT)
    }

    /// A literal length in centimeters.
    pub fn cm(v: f64) -> Self {
        Dim::mm(v * 10.0)
    }

    /// A literal length in inches.
    pub fn inch(v: f64) -> Self {
        Dim::pt(v * 72.0)
    }

    /// A literal length in picas (12 points).
    pub fn pica(v: f64) -> Self {
        Dim::pt(v * 12.0)
    }

    pub fn zero() -> Self {
        Dim::pt(0.0)
    }

    /// Evaluate the expression to points. Never has side effects.
    pub fn value(&self) -> f64 {
        match &*self.0.borrow() {
            Expr::Literal(v) => *v,
            Expr::Sum(a, b) => a.value() + b.value(),
            Expr::Diff(a, b) => a.value() - b.value(),
            Expr::Scale(a, f) => a.value() * f,
        }
    }

    /// Grow a literal by `delta` points. Every expression sharing this node
    /// sees the new value at its next evaluation.
    ///
    /// Growing a non-literal is a programming error; it is a debug
    /// assertion and a no-op in release builds.
    pub fn grow(&self, delta: f64) {
        let mut node = self.0.borrow_mut();
        match &mut *node {
            Expr::Literal(v) => *v += delta,
            _ => debug_assert!(false, "grow() called on a non-literal Dim"),
        }
    }

    /// Overwrite a literal's value. Same restrictions as [`Dim::grow`].
    pub fn set(&self, value: f64) {
        let mut node = self.0.borrow_mut();
        match &mut *node {
            Expr::Literal(v) => *v = value,
            _ => debug_assert!(false, "set() called on a non-literal Dim"),
        }
    }

    /// Whether two handles share the same expression node.
    pub fn same_node(&self, other: &Dim) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Whether this handle points at a literal (growable) node.
    pub fn is_literal(&self) -> bool {
        matches!(&*self.0.borrow(), Expr::Literal(_))
    }
}

impl fmt::Debug for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dim({}pt)", self.value())
    }
}

impl From<f64> for Dim {
    fn from(v: f64) -> Self {
        Dim::pt(v)
    }
}

impl Add for &Dim {
    type Output = Dim;
    fn add(self, rhs: &Dim) -> Dim {
        Dim::new(Expr::Sum(self.clone(), rhs.clone()))
    }
}

impl Add for Dim {
    type Output = Dim;
    fn add(self, rhs: Dim) -> Dim {
        &self + &rhs
    }
}

impl Sub for &Dim {
    type Output = Dim;
    fn sub(self, rhs: &Dim) -> Dim {
        Dim::new(Expr::Diff(self.clone(), rhs.clone()))
    }
}

impl Sub for Dim {
    type Output = Dim;
    fn sub(self, rhs: Dim) -> Dim {
        &self - &rhs
    }
}

impl Mul<f64> for &Dim {
    type Output = Dim;
    fn mul(self, rhs: f64) -> Dim {
        Dim::new(Expr::Scale(self.clone(), rhs))
    }
}

impl Mul<f64> for Dim {
    type Output = Dim;
    fn mul(self, rhs: f64) -> Dim {
        &self * rhs
    }
}

impl Div<f64> for &Dim {
    type Output = Dim;
    fn div(self, rhs: f64) -> Dim {
        Dim::new(Expr::Scale(self.clone(), 1.0 / rhs))
    }
}

impl Div<f64> for Dim {
    type Output = Dim;
    fn div(self, rhs: f64) -> Dim {
        &self / rhs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_units() {
        assert!((Dim::inch(1.0).value() - 72.0).abs() < 1e-9);
        assert!((Dim::pica(2.0).value() - 24.0).abs() < 1e-9);
        assert!((Dim::mm(25.4).value() - 72.0).abs() < 1e-6);
        assert!((Dim::cm(2.54).value() - 72.0).abs() < 1e-6);
    }

    #[test]
    fn test_arithmetic_matches_evaluated_operands() {
        let a = Dim::pt(10.0);
        let b = Dim::pt(4.0);
        assert_eq!((&a + &b).value(), 14.0);
        assert_eq!((&a - &b).value(), 6.0);
        assert_eq!((&a * 2.5).value(), 25.0);
        assert_eq!((&a / 4.0).value(), 2.5);
    }

    #[test]
    fn test_growing_a_literal_is_seen_by_later_evaluations() {
        let a = Dim::pt(10.0);
        let c = Dim::pt(5.0);
        let b = &a + &c;
        assert_eq!(b.value(), 15.0);

        a.grow(7.0);
        // The already-consumed 15.0 is not corrected; the next read is.
        assert_eq!(b.value(), 22.0);
    }

    #[test]
    fn test_nested_expressions_stay_lazy() {
        let float_space = Dim::pt(0.0);
        let page = Dim::pt(800.0);
        let body = &page - &float_space;
        let half = &body / 2.0;
        assert_eq!(half.value(), 400.0);

        float_space.grow(100.0);
        assert_eq!(body.value(), 700.0);
        assert_eq!(half.value(), 350.0);
    }

    #[test]
    fn test_shared_handles() {
        let a = Dim::pt(1.0);
        let b = a.clone();
        assert!(a.same_node(&b));
        b.grow(1.0);
        assert_eq!(a.value(), 2.0);
    }
}
