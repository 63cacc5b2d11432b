//! Per-element activation bodies shared by the generic kernels and the
//! reference primitive backend.
//!
//! Floating functors widen to `FloatElement::Acc` (f32 for half types, f64
//! for doubles) and narrow once on return.

use std::f64::consts::{FRAC_1_SQRT_2, FRAC_2_SQRT_PI, SQRT_2};

use crate::core::types::{Element, FloatElement, OpMath};

type Acc<T> = <T as FloatElement>::Acc;

/// Host scalar in the accumulate type of `T`.
#[inline]
pub fn acc<T: FloatElement>(v: f64) -> Acc<T> {
    <Acc<T> as OpMath>::from_f64(v)
}

/// `x > 0 ? x : 0`. NaN maps to zero.
#[inline]
pub fn relu<T: Element>(x: T) -> T {
    if x > T::zero() { x } else { T::zero() }
}

/// Gradient of ReLU given the forward input (or result): `x <= 0 ? 0 : dy`.
#[inline]
pub fn relu_backward<T: Element>(dy: T, x: T) -> T {
    if x <= T::zero() { T::zero() } else { dy }
}

#[inline]
pub fn threshold<T: Element>(x: T, other: T, threshold: T, value: T) -> T {
    if x <= threshold { value } else { other }
}

#[inline]
pub fn leaky_relu<T: FloatElement>(x: T, negative_slope: Acc<T>) -> T {
    let a = x.to_acc();
    if a > acc::<T>(0.0) {
        x
    } else {
        T::from_acc(a * negative_slope)
    }
}

#[inline]
pub fn leaky_relu_backward<T: FloatElement>(dy: T, x: T, negative_slope: Acc<T>) -> T {
    if x.to_acc() > acc::<T>(0.0) {
        dy
    } else {
        T::from_acc(dy.to_acc() * negative_slope)
    }
}

#[inline]
pub fn gelu_erf<T: FloatElement>(x: T) -> T {
    let x = x.to_acc();
    T::from_acc(x * acc::<T>(0.5) * (acc::<T>(1.0) + (x * acc::<T>(FRAC_1_SQRT_2)).erf()))
}

#[inline]
pub fn gelu_tanh<T: FloatElement>(x: T) -> T {
    let beta = acc::<T>(SQRT_2 * FRAC_2_SQRT_PI * 0.5);
    let kappa = acc::<T>(0.044715);
    let x = x.to_acc();
    let inner = beta * (x + kappa * x * x * x);
    T::from_acc(acc::<T>(0.5) * x * (acc::<T>(1.0) + inner.tanh()))
}

#[inline]
pub fn gelu_erf_backward<T: FloatElement>(dy: T, x: T) -> T {
    let beta = acc::<T>(FRAC_2_SQRT_PI * FRAC_1_SQRT_2 * 0.5);
    let x = x.to_acc();
    let cdf = acc::<T>(0.5) * (acc::<T>(1.0) + (x * acc::<T>(FRAC_1_SQRT_2)).erf());
    let pdf = (acc::<T>(-0.5) * x * x).exp() * beta;
    T::from_acc(dy.to_acc() * (cdf + x * pdf))
}

#[inline]
pub fn gelu_tanh_backward<T: FloatElement>(dy: T, x: T) -> T {
    let beta = acc::<T>(SQRT_2 * FRAC_2_SQRT_PI * 0.5);
    let kappa = acc::<T>(0.044715);
    let one = acc::<T>(1.0);
    let x = x.to_acc();
    let x_sq = x * x;
    let tanh_inner = (beta * (x + kappa * x_sq * x)).tanh();

    let left = acc::<T>(0.5) * x;
    let right = one + tanh_inner;
    let left_derivative = acc::<T>(0.5) * right;
    let tanh_derivative = one - tanh_inner * tanh_inner;
    let inner_derivative = beta * (one + acc::<T>(3.0) * kappa * x_sq);
    let right_derivative = left * tanh_derivative * inner_derivative;

    T::from_acc(dy.to_acc() * (left_derivative + right_derivative))
}

#[inline]
pub fn silu<T: FloatElement>(x: T) -> T {
    let x = x.to_acc();
    T::from_acc(x / (acc::<T>(1.0) + (-x).exp()))
}

#[inline]
pub fn silu_backward<T: FloatElement>(dy: T, x: T) -> T {
    let one = acc::<T>(1.0);
    let x = x.to_acc();
    let sigmoid = one / (one + (-x).exp());
    T::from_acc(dy.to_acc() * sigmoid * (one + x * (one - sigmoid)))
}

#[inline]
pub fn mish<T: FloatElement>(x: T) -> T {
    let x = x.to_acc();
    T::from_acc(x * x.exp().ln_1p().tanh())
}

#[inline]
pub fn hardshrink<T: FloatElement>(x: T, lambd: Acc<T>) -> T {
    let a = x.to_acc();
    if a >= -lambd && a <= lambd { T::zero() } else { x }
}

#[inline]
pub fn hardshrink_backward<T: FloatElement>(dy: T, x: T, lambd: Acc<T>) -> T {
    let a = x.to_acc();
    if a >= -lambd && a <= lambd { T::zero() } else { dy }
}

#[inline]
pub fn hardswish<T: FloatElement>(x: T) -> T {
    let x = x.to_acc();
    let gate = (x + acc::<T>(3.0)).max(acc::<T>(0.0)).min(acc::<T>(6.0));
    T::from_acc(x * gate / acc::<T>(6.0))
}

#[inline]
pub fn hardswish_backward<T: FloatElement>(dy: T, x: T) -> T {
    let x = x.to_acc();
    if x < acc::<T>(-3.0) {
        T::zero()
    } else if x <= acc::<T>(3.0) {
        T::from_acc(dy.to_acc() * (x / acc::<T>(3.0) + acc::<T>(0.5)))
    } else {
        dy
    }
}

#[inline]
pub fn mul<T: FloatElement>(a: T, b: T) -> T {
    T::from_acc(a.to_acc() * b.to_acc())
}
