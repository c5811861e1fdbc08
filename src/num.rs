//! Because exact number handling is quite important to Scheme
//!
//! Every [`Number`] is a pair of [`Real`] components (real and imaginary). A
//! component is either an exact, fully reduced [`Ratio`] of big integers, or an
//! inexact `f64`. Both components of one number always share their exactness:
//! mixing an inexact operand into any operation makes the whole result inexact.
use core::{cmp::Ordering, fmt};

use arbitrary::{Arbitrary, Unstructured};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{float::FloatCore, One, Signed, ToPrimitive, Zero};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum NumberError {
    #[error("{operation}: expected a real number, found {found}")]
    NotReal {
        operation: &'static str,
        found: Number,
    },
    #[error("{operation}: expected {expected}, found {found}")]
    Domain {
        operation: &'static str,
        expected: &'static str,
        found: Number,
    },
    #[error("{0}: division by exact zero")]
    DivisionByZero(&'static str),
}

/// An exact fraction in lowest terms with a strictly positive denominator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ratio {
    numer: BigInt,
    denom: BigInt,
}

impl Ratio {
    /// Builds a reduced fraction, or `None` when `denom` is zero.
    pub fn new(numer: BigInt, denom: BigInt) -> Option<Self> {
        if denom.is_zero() {
            return None;
        }
        let divisor = numer.gcd(&denom);
        let (mut numer, mut denom) = if divisor.is_one() || divisor.is_zero() {
            (numer, denom)
        } else {
            (numer / &divisor, denom / &divisor)
        };
        if denom.is_negative() {
            numer = -numer;
            denom = -denom;
        }
        Some(Self { numer, denom })
    }

    pub fn integer(value: impl Into<BigInt>) -> Self {
        Self {
            numer: value.into(),
            denom: BigInt::one(),
        }
    }

    pub fn zero() -> Self {
        Self::integer(0)
    }

    pub fn numer(&self) -> &BigInt {
        &self.numer
    }

    pub fn denom(&self) -> &BigInt {
        &self.denom
    }

    pub fn is_integer(&self) -> bool {
        self.denom.is_one()
    }

    pub fn is_zero(&self) -> bool {
        self.numer.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.numer.is_negative()
    }

    /// Recovers the exact binary value of a finite float.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let (mantissa, exponent, sign) = FloatCore::integer_decode(value);
        let mantissa = BigInt::from(mantissa) * BigInt::from(sign);
        if exponent >= 0 {
            Some(Self::integer(mantissa << exponent as usize))
        } else {
            Self::new(mantissa, BigInt::one() << (-exponent) as usize)
        }
    }

    pub fn to_f64(&self) -> f64 {
        let (numer, denom) = (self.numer.to_f64(), self.denom.to_f64());
        match (numer, denom) {
            (Some(n), Some(d)) if n.is_finite() && d.is_finite() => n / d,
            _ => {
                // scale both down so the quotient survives the conversion
                let bits = self.numer.bits().max(self.denom.bits());
                let shift = bits.saturating_sub(1000) as usize;
                let n = (&self.numer >> shift).to_f64().unwrap_or(f64::NAN);
                let d = (&self.denom >> shift).to_f64().unwrap_or(f64::NAN);
                n / d
            }
        }
    }

    fn add(&self, other: &Self) -> Self {
        Self::new(
            &self.numer * &other.denom + &other.numer * &self.denom,
            &self.denom * &other.denom,
        )
        .unwrap_or_else(Self::zero)
    }

    fn mul(&self, other: &Self) -> Self {
        Self::new(&self.numer * &other.numer, &self.denom * &other.denom)
            .unwrap_or_else(Self::zero)
    }

    fn neg(&self) -> Self {
        Self {
            numer: -&self.numer,
            denom: self.denom.clone(),
        }
    }

    fn recip(&self) -> Option<Self> {
        Self::new(self.denom.clone(), self.numer.clone())
    }

    fn floor(&self) -> BigInt {
        self.numer.div_floor(&self.denom)
    }

    fn ceiling(&self) -> BigInt {
        -(-&self.numer).div_floor(&self.denom)
    }

    fn truncate(&self) -> BigInt {
        &self.numer / &self.denom
    }

    // round to nearest, ties to even
    fn round(&self) -> BigInt {
        let floor = self.floor();
        let diff = self.add(&Self::integer(-floor.clone()));
        let half = Self {
            numer: BigInt::one(),
            denom: BigInt::from(2),
        };
        match diff.cmp(&half) {
            Ordering::Less => floor,
            Ordering::Greater => floor + 1,
            Ordering::Equal if floor.is_even() => floor,
            Ordering::Equal => floor + 1,
        }
    }
}

impl PartialOrd for Ratio {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ratio {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.numer * &other.denom).cmp(&(&other.numer * &self.denom))
    }
}

/// One component of a [`Number`]
#[derive(Debug, Clone)]
pub enum Real {
    Exact(Ratio),
    Inexact(f64),
}

impl Real {
    pub fn zero() -> Self {
        Self::Exact(Ratio::zero())
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Self::Exact(r) => r.is_zero(),
            Self::Inexact(f) => *f == 0.0,
        }
    }

    fn is_exact_zero(&self) -> bool {
        matches!(self, Self::Exact(r) if r.is_zero())
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Self::Exact(r) => r.is_negative(),
            Self::Inexact(f) => *f < 0.0,
        }
    }

    pub fn is_integer(&self) -> bool {
        match self {
            Self::Exact(r) => r.is_integer(),
            Self::Inexact(f) => f.is_finite() && f.fract() == 0.0,
        }
    }

    pub fn to_f64(&self) -> f64 {
        match self {
            Self::Exact(r) => r.to_f64(),
            Self::Inexact(f) => *f,
        }
    }

    pub fn to_inexact(&self) -> Self {
        Self::Inexact(self.to_f64())
    }

    fn add(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => Self::Exact(a.add(b)),
            _ => Self::Inexact(self.to_f64() + other.to_f64()),
        }
    }

    fn mul(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => Self::Exact(a.mul(b)),
            _ => Self::Inexact(self.to_f64() * other.to_f64()),
        }
    }

    fn neg(&self) -> Self {
        match self {
            Self::Exact(r) => Self::Exact(r.neg()),
            Self::Inexact(f) => Self::Inexact(-f),
        }
    }

    fn sub(&self, other: &Self) -> Self {
        self.add(&other.neg())
    }

    fn div(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => Some(Self::Exact(a.mul(&b.recip()?))),
            _ => Some(Self::Inexact(self.to_f64() / other.to_f64())),
        }
    }

    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => Some(a.cmp(b)),
            _ => self.to_f64().partial_cmp(&other.to_f64()),
        }
    }

    fn num_eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }

    fn map_integral(&self, exact: impl Fn(&Ratio) -> BigInt, inexact: impl Fn(f64) -> f64) -> Self {
        match self {
            Self::Exact(r) => Self::Exact(Ratio::integer(exact(r))),
            Self::Inexact(f) => Self::Inexact(inexact(*f)),
        }
    }

    fn fmt_radix(&self, radix: u32) -> Option<String> {
        match self {
            Self::Exact(r) if r.is_integer() => Some(r.numer.to_str_radix(radix)),
            Self::Exact(r) => Some(format!(
                "{}/{}",
                r.numer.to_str_radix(radix),
                r.denom.to_str_radix(radix)
            )),
            Self::Inexact(f) if radix == 10 => Some(if f.is_nan() {
                "+nan.0".to_owned()
            } else if f.is_infinite() {
                (if *f > 0.0 { "+inf.0" } else { "-inf.0" }).to_owned()
            } else {
                fmt_inexact(*f)
            }),
            Self::Inexact(_) => None,
        }
    }
}

// integral values always carry a `.0`, in positional or exponent form
fn fmt_inexact(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e21 {
        return format!("{f:.1}");
    }
    let text = format!("{f:?}");
    match text.split_once('e') {
        Some((mantissa, exponent)) if !mantissa.contains('.') => format!("{mantissa}.0e{exponent}"),
        _ => text,
    }
}

fn round_half_even(f: f64) -> f64 {
    if (f - f.trunc()).abs() == 0.5 {
        2.0 * (f / 2.0).round()
    } else {
        f.round()
    }
}

/// A Scheme number: real and imaginary components with shared exactness
#[derive(Debug, Clone)]
pub struct Number {
    real: Real,
    imag: Real,
}

impl Number {
    pub fn rectangular(real: Real, imag: Real) -> Self {
        if real.is_exact() && imag.is_exact() {
            Self { real, imag }
        } else {
            Self {
                real: real.to_inexact(),
                imag: imag.to_inexact(),
            }
        }
    }

    pub fn from_real(real: Real) -> Self {
        let imag = if real.is_exact() {
            Real::zero()
        } else {
            Real::Inexact(0.0)
        };
        Self { real, imag }
    }

    pub fn integer(value: impl Into<BigInt>) -> Self {
        Self::from_real(Real::Exact(Ratio::integer(value)))
    }

    pub fn rational(numer: impl Into<BigInt>, denom: impl Into<BigInt>) -> Result<Self, NumberError> {
        Ratio::new(numer.into(), denom.into())
            .map(|r| Self::from_real(Real::Exact(r)))
            .ok_or(NumberError::DivisionByZero("/"))
    }

    pub fn inexact(value: f64) -> Self {
        Self::from_real(Real::Inexact(value))
    }

    pub fn real_part(&self) -> &Real {
        &self.real
    }

    pub fn imag_part(&self) -> &Real {
        &self.imag
    }

    pub fn is_exact(&self) -> bool {
        self.real.is_exact() && self.imag.is_exact()
    }

    pub fn is_real(&self) -> bool {
        self.imag.is_zero()
    }

    pub fn is_rational(&self) -> bool {
        self.is_real() && self.real.to_f64().is_finite()
    }

    pub fn is_integer(&self) -> bool {
        self.is_real() && self.real.is_integer()
    }

    pub fn is_exact_integer(&self) -> bool {
        self.is_exact() && self.is_integer()
    }

    pub fn is_zero(&self) -> bool {
        self.real.is_zero() && self.imag.is_zero()
    }

    pub fn is_nan(&self) -> bool {
        self.real.to_f64().is_nan() || self.imag.to_f64().is_nan()
    }

    /// The real component, or an error naming `operation` for non-real numbers.
    pub fn as_real(&self, operation: &'static str) -> Result<&Real, NumberError> {
        if self.is_real() {
            Ok(&self.real)
        } else {
            Err(NumberError::NotReal {
                operation,
                found: self.clone(),
            })
        }
    }

    fn as_integer(&self, operation: &'static str) -> Result<&Real, NumberError> {
        if self.is_integer() {
            Ok(&self.real)
        } else {
            Err(NumberError::Domain {
                operation,
                expected: "an integer",
                found: self.clone(),
            })
        }
    }

    /// A non-negative exact integer usable as an index.
    pub fn as_index(&self) -> Option<usize> {
        match &self.real {
            Real::Exact(r) if self.is_exact_integer() => r.numer.to_usize(),
            _ => None,
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        match &self.real {
            Real::Exact(r) if self.is_exact_integer() => r.numer.to_i64(),
            _ => None,
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        Self::rectangular(self.real.add(&other.real), self.imag.add(&other.imag))
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.add(&other.negate())
    }

    pub fn mul(&self, other: &Self) -> Self {
        let (a, b, c, d) = (&self.real, &self.imag, &other.real, &other.imag);
        Self::rectangular(a.mul(c).sub(&b.mul(d)), a.mul(d).add(&b.mul(c)))
    }

    pub fn negate(&self) -> Self {
        Self::rectangular(self.real.neg(), self.imag.neg())
    }

    pub fn conjugate(&self) -> Self {
        Self::rectangular(self.real.clone(), self.imag.neg())
    }

    /// `1/z`, computed as `conj(z) / |z|^2`
    pub fn inverse(&self) -> Result<Self, NumberError> {
        let (a, b) = (&self.real, &self.imag);
        let norm = a.mul(a).add(&b.mul(b));
        if norm.is_exact() && norm.is_zero() {
            return Err(NumberError::DivisionByZero("/"));
        }
        let scale = |x: &Real| x.div(&norm).ok_or(NumberError::DivisionByZero("/"));
        Ok(Self::rectangular(scale(a)?, scale(&b.neg())?))
    }

    pub fn div(&self, other: &Self) -> Result<Self, NumberError> {
        if other.is_exact() && other.is_zero() {
            return Err(NumberError::DivisionByZero("/"));
        }
        if self.is_real() && other.is_real() {
            // keeps -0.0 and infinities intact for real division
            let real = self
                .real
                .div(&other.real)
                .ok_or(NumberError::DivisionByZero("/"))?;
            let both_exact = self.is_exact() && other.is_exact();
            return Ok(if both_exact {
                Self::from_real(real)
            } else {
                Self::from_real(real.to_inexact())
            });
        }
        Ok(self.mul(&other.inverse()?))
    }

    /// Orders two real numbers. `None` when either is NaN.
    pub fn cmp(&self, other: &Self, operation: &'static str) -> Result<Option<Ordering>, NumberError> {
        let a = self.as_real(operation)?;
        let b = other.as_real(operation)?;
        Ok(a.partial_cmp(b))
    }

    /// Numeric `=`: defined for complex numbers too, ignores exactness.
    pub fn num_eq(&self, other: &Self) -> bool {
        self.real.num_eq(&other.real) && self.imag.num_eq(&other.imag)
    }

    /// `eqv?` on numbers: equal value *and* equal exactness.
    pub fn eqv(&self, other: &Self) -> bool {
        if self.is_exact() != other.is_exact() {
            return false;
        }
        let same = |a: &Real, b: &Real| match (a, b) {
            (Real::Exact(x), Real::Exact(y)) => x == y,
            (Real::Inexact(x), Real::Inexact(y)) => {
                x.to_bits() == y.to_bits() || (x == y && *x != 0.0)
            }
            _ => false,
        };
        same(&self.real, &other.real) && same(&self.imag, &other.imag)
    }

    pub fn to_inexact(&self) -> Self {
        Self::rectangular(self.real.to_inexact(), self.imag.to_inexact())
    }

    pub fn to_exact(&self) -> Result<Self, NumberError> {
        let exact = |r: &Real| match r {
            Real::Exact(_) => Ok(r.clone()),
            Real::Inexact(f) => Ratio::from_f64(*f)
                .map(Real::Exact)
                .ok_or_else(|| NumberError::Domain {
                    operation: "exact",
                    expected: "a finite number",
                    found: self.clone(),
                }),
        };
        Ok(Self::rectangular(exact(&self.real)?, exact(&self.imag)?))
    }

    fn integer_division(
        &self,
        other: &Self,
        operation: &'static str,
        exact: impl Fn(&BigInt, &BigInt) -> BigInt,
        inexact: impl Fn(f64, f64) -> f64,
    ) -> Result<Self, NumberError> {
        let a = self.as_integer(operation)?;
        let b = other.as_integer(operation)?;
        if b.is_zero() {
            return Err(NumberError::DivisionByZero(operation));
        }
        Ok(Self::from_real(match (a, b) {
            (Real::Exact(x), Real::Exact(y)) => Real::Exact(Ratio::integer(exact(&x.numer, &y.numer))),
            _ => Real::Inexact(inexact(a.to_f64(), b.to_f64())),
        }))
    }

    pub fn quotient(&self, other: &Self) -> Result<Self, NumberError> {
        self.integer_division(other, "quotient", |a, b| a / b, |a, b| (a / b).trunc())
    }

    pub fn remainder(&self, other: &Self) -> Result<Self, NumberError> {
        self.integer_division(other, "remainder", |a, b| a % b, |a, b| a % b)
    }

    pub fn modulo(&self, other: &Self) -> Result<Self, NumberError> {
        self.integer_division(other, "modulo", |a, b| a.mod_floor(b), |a, b| {
            a - b * (a / b).floor()
        })
    }

    pub fn gcd(&self, other: &Self) -> Result<Self, NumberError> {
        self.integer_division_total(other, "gcd", |a, b| a.gcd(b))
    }

    pub fn lcm(&self, other: &Self) -> Result<Self, NumberError> {
        self.integer_division_total(other, "lcm", |a, b| a.lcm(b))
    }

    fn integer_division_total(
        &self,
        other: &Self,
        operation: &'static str,
        op: impl Fn(&BigInt, &BigInt) -> BigInt,
    ) -> Result<Self, NumberError> {
        let a = self.as_integer(operation)?;
        let b = other.as_integer(operation)?;
        let as_big = |r: &Real| match r {
            Real::Exact(x) => Ok(x.numer.clone()),
            Real::Inexact(f) => Ratio::from_f64(*f)
                .map(|x| x.numer)
                .ok_or(NumberError::Domain {
                    operation,
                    expected: "a finite integer",
                    found: self.clone(),
                }),
        };
        let result = Self::integer(op(&as_big(a)?, &as_big(b)?));
        Ok(if a.is_exact() && b.is_exact() {
            result
        } else {
            result.to_inexact()
        })
    }

    pub fn floor(&self) -> Result<Self, NumberError> {
        let r = self.as_real("floor")?;
        Ok(Self::from_real(r.map_integral(Ratio::floor, f64::floor)))
    }

    pub fn ceiling(&self) -> Result<Self, NumberError> {
        let r = self.as_real("ceiling")?;
        Ok(Self::from_real(r.map_integral(Ratio::ceiling, f64::ceil)))
    }

    pub fn truncate(&self) -> Result<Self, NumberError> {
        let r = self.as_real("truncate")?;
        Ok(Self::from_real(r.map_integral(Ratio::truncate, f64::trunc)))
    }

    pub fn round(&self) -> Result<Self, NumberError> {
        let r = self.as_real("round")?;
        Ok(Self::from_real(r.map_integral(Ratio::round, round_half_even)))
    }

    pub fn numerator(&self) -> Result<Self, NumberError> {
        match self.as_real("numerator")? {
            Real::Exact(r) => Ok(Self::integer(r.numer.clone())),
            Real::Inexact(_) => Ok(self.to_exact()?.numerator()?.to_inexact()),
        }
    }

    pub fn denominator(&self) -> Result<Self, NumberError> {
        match self.as_real("denominator")? {
            Real::Exact(r) => Ok(Self::integer(r.denom.clone())),
            Real::Inexact(_) => Ok(self.to_exact()?.denominator()?.to_inexact()),
        }
    }

    pub fn abs(&self) -> Result<Self, NumberError> {
        let r = self.as_real("abs")?;
        Ok(if r.is_negative() {
            self.negate()
        } else {
            self.clone()
        })
    }

    pub fn magnitude(&self) -> Self {
        if self.is_real() {
            return if self.real.is_negative() {
                self.negate()
            } else {
                self.clone()
            };
        }
        let (a, b) = (&self.real, &self.imag);
        Self::from_real(a.mul(a).add(&b.mul(b))).sqrt()
    }

    pub fn angle(&self) -> Self {
        Self::inexact(self.imag.to_f64().atan2(self.real.to_f64()))
    }

    /// Principal square root. Exact for exact perfect squares (including
    /// negative ones, which give an exact imaginary result).
    pub fn sqrt(&self) -> Self {
        if self.is_real() {
            if let Real::Exact(r) = &self.real {
                let root = |n: &BigInt| {
                    let s = n.sqrt();
                    (&s * &s == *n).then_some(s)
                };
                let magnitude = r.numer.abs();
                if let (Some(n), Some(d)) = (root(&magnitude), root(&r.denom)) {
                    if let Some(value) = Ratio::new(n, d) {
                        let value = Real::Exact(value);
                        return if r.is_negative() {
                            Self::rectangular(Real::zero(), value)
                        } else {
                            Self::from_real(value)
                        };
                    }
                }
            }
            let f = self.real.to_f64();
            return if f < 0.0 {
                Self::rectangular(Real::Inexact(0.0), Real::Inexact((-f).sqrt()))
            } else {
                Self::inexact(f.sqrt())
            };
        }
        let (a, b) = (self.real.to_f64(), self.imag.to_f64());
        let m = a.hypot(b);
        let re = ((m + a) / 2.0).sqrt();
        let im = ((m - a) / 2.0).sqrt().copysign(b);
        Self::rectangular(Real::Inexact(re), Real::Inexact(im))
    }

    pub fn expt(&self, exponent: &Self) -> Result<Self, NumberError> {
        if let (true, Real::Exact(e)) = (exponent.is_exact_integer(), &exponent.real) {
            let power = e.numer.abs().to_u32().ok_or(NumberError::Domain {
                operation: "expt",
                expected: "an exponent that fits in 32 bits",
                found: exponent.clone(),
            })?;
            let mut result = if self.is_exact() {
                Self::integer(1)
            } else {
                Self::inexact(1.0)
            };
            let mut base = self.clone();
            let mut remaining = power;
            while remaining > 0 {
                if remaining & 1 == 1 {
                    result = result.mul(&base);
                }
                base = base.mul(&base);
                remaining >>= 1;
            }
            return if e.is_negative() {
                result.inverse()
            } else {
                Ok(result)
            };
        }
        let e = exponent.as_real("expt")?.to_f64();
        if self.is_real() && (!self.real.is_negative() || exponent.is_integer()) {
            return Ok(Self::inexact(self.real.to_f64().powf(e)));
        }
        // r^e * (cos(e*theta) + i*sin(e*theta))
        let (a, b) = (self.real.to_f64(), self.imag.to_f64());
        let r = a.hypot(b).powf(e);
        let theta = b.atan2(a) * e;
        Ok(Self::rectangular(
            Real::Inexact(r * theta.cos()),
            Real::Inexact(r * theta.sin()),
        ))
    }

    /// Applies a real-only transcendental function, always giving an inexact result.
    pub fn transcendental(&self, operation: &'static str, func: fn(f64) -> f64) -> Result<Self, NumberError> {
        let r = self.as_real(operation)?;
        Ok(Self::inexact(func(r.to_f64())))
    }

    pub fn to_string_radix(&self, radix: u32) -> Option<String> {
        let real = self.real.fmt_radix(radix)?;
        if self.is_real() {
            return Some(real);
        }
        let imag = self.imag.fmt_radix(radix)?;
        let sign = if imag.starts_with(['+', '-']) { "" } else { "+" };
        let real = if self.real.is_exact_zero() { String::new() } else { real };
        Some(format!("{real}{sign}{imag}i"))
    }

    /// Reads the external representation of a number. Prefixes (`#e`, `#i`,
    /// `#b`, `#o`, `#d`, `#x`) override `radix` and the default exactness.
    pub fn parse(text: &str, radix: u32) -> Option<Self> {
        let mut radix = radix;
        let mut exactness = None;
        let mut rest = text;
        let (mut seen_radix, mut seen_exactness) = (false, false);
        while let Some(prefixed) = rest.strip_prefix('#') {
            let mut chars = prefixed.chars();
            let flag = chars.next()?.to_ascii_lowercase();
            match flag {
                'e' | 'i' if !seen_exactness => {
                    seen_exactness = true;
                    exactness = Some(flag == 'e');
                }
                'b' | 'o' | 'd' | 'x' if !seen_radix => {
                    seen_radix = true;
                    radix = match flag {
                        'b' => 2,
                        'o' => 8,
                        'd' => 10,
                        _ => 16,
                    };
                }
                _ => return None,
            }
            rest = chars.as_str();
        }
        let exact = exactness == Some(true);
        let number = parse_complex(rest, radix, exact)?;
        match exactness {
            Some(true) => number.to_exact().ok(),
            Some(false) => Some(number.to_inexact()),
            None => Some(number),
        }
    }
}

fn parse_complex(text: &str, radix: u32, exact: bool) -> Option<Number> {
    let Some(body) = text.strip_suffix(['i', 'I']) else {
        return parse_real(text, radix, true, exact).map(Number::from_real);
    };
    // the imaginary part starts at the last sign that is not an exponent sign
    let bytes = body.as_bytes();
    let split = (0..bytes.len()).rev().find(|&idx| {
        matches!(bytes[idx], b'+' | b'-')
            && !(radix == 10 && idx > 0 && matches!(bytes[idx - 1], b'e' | b'E'))
    })?;
    let real = if split == 0 {
        Real::zero()
    } else {
        parse_real(&body[..split], radix, true, exact)?
    };
    let imag = match &body[split..] {
        "+" => Real::Exact(Ratio::integer(1)),
        "-" => Real::Exact(Ratio::integer(-1)),
        imag => parse_real(imag, radix, false, exact)?,
    };
    Some(Number::rectangular(real, imag))
}

fn parse_real(text: &str, radix: u32, sign_optional: bool, exact: bool) -> Option<Real> {
    match text.to_ascii_lowercase().as_str() {
        "+inf.0" => return Some(Real::Inexact(f64::INFINITY)),
        "-inf.0" => return Some(Real::Inexact(f64::NEG_INFINITY)),
        "+nan.0" | "-nan.0" => return Some(Real::Inexact(f64::NAN)),
        _ => {}
    }
    let (negative, digits) = match text.as_bytes().first()? {
        b'+' => (false, &text[1..]),
        b'-' => (true, &text[1..]),
        _ if sign_optional => (false, text),
        _ => return None,
    };
    let sign = |r: Real| if negative { r.neg() } else { r };
    let unsigned = |s: &str| {
        (!s.is_empty() && s.chars().all(|c| c.is_digit(radix)))
            .then(|| BigInt::parse_bytes(s.as_bytes(), radix))
            .flatten()
    };
    if let Some((numer, denom)) = digits.split_once('/') {
        let ratio = Ratio::new(unsigned(numer)?, unsigned(denom)?)?;
        return Some(sign(Real::Exact(ratio)));
    }
    if let Some(integer) = unsigned(digits) {
        return Some(sign(Real::Exact(Ratio::integer(integer))));
    }
    if radix != 10 {
        return None;
    }
    parse_decimal(digits, exact).map(sign)
}

// `digits` is an unsigned decimal with an optional fraction and exponent
fn parse_decimal(digits: &str, exact: bool) -> Option<Real> {
    let (mantissa, exponent) = match digits.find(['e', 'E']) {
        Some(idx) => (&digits[..idx], Some(&digits[idx + 1..])),
        None => (digits, None),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if whole.is_empty() && fraction.is_empty() || !all_digits(whole) || !all_digits(fraction) {
        return None;
    }
    let scale = match exponent {
        Some(exponent) => {
            let unsigned = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            if unsigned.is_empty() || !all_digits(unsigned) {
                return None;
            }
            exponent.parse::<i32>().ok()?
        }
        None => 0,
    };
    if !exact {
        return digits.parse::<f64>().ok().map(Real::Inexact);
    }
    let numer = BigInt::parse_bytes(format!("{whole}{fraction}").as_bytes(), 10)?;
    let scale = scale.checked_sub(i32::try_from(fraction.len()).ok()?)?;
    let power = BigInt::from(10).pow(scale.unsigned_abs());
    let ratio = if scale >= 0 {
        Ratio::integer(numer * power)
    } else {
        Ratio::new(numer, power)?
    };
    Some(Real::Exact(ratio))
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.eqv(other)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Self::integer(value)
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Self::integer(i64::from(value))
    }
}

impl From<usize> for Number {
    fn from(value: usize) -> Self {
        Self::integer(value)
    }
}

impl From<BigInt> for Number {
    fn from(value: BigInt) -> Self {
        Self::integer(value)
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Self::inexact(value)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_string_radix(10) {
            Some(text) => f.write_str(&text),
            None => write!(f, "#<number>"),
        }
    }
}

fn arbitrary_real(u: &mut Unstructured<'_>) -> arbitrary::Result<Real> {
    if u.arbitrary()? {
        let numer: i64 = u.arbitrary()?;
        let denom: i64 = u.int_in_range(1..=1000)?;
        Ratio::new(numer.into(), denom.into())
            .map(Real::Exact)
            .ok_or(arbitrary::Error::IncorrectFormat)
    } else {
        let scaled: i32 = u.arbitrary()?;
        Ok(Real::Inexact(f64::from(scaled) / 64.0))
    }
}

impl<'a> Arbitrary<'a> for Number {
    fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
        let real = arbitrary_real(u)?;
        let imag = if u.ratio(1, 4)? {
            arbitrary_real(u)?
        } else {
            Real::zero()
        };
        Ok(Self::rectangular(real, imag))
    }
}

#[cfg(test)]
mod tests {
    use super::{Number, NumberError, Real};
    use arbtest::arbtest;
    use assert2::{check, let_assert};

    fn num(text: &str) -> Number {
        let_assert!(Some(n) = Number::parse(text, 10));
        n
    }

    #[test]
    fn exact_rationals_reduce() {
        check!(num("6/4").to_string() == "3/2");
        check!(num("-10/5").to_string() == "-2");
        check!(num("0/7").to_string() == "0");
        check!(num("#e1.25").to_string() == "5/4");
    }

    #[test]
    fn exactness_propagation() {
        let sum = num("1/2").add(&num("1/3"));
        check!(sum.is_exact());
        check!(sum.to_string() == "5/6");

        let mixed = num("1/2").add(&num(".5"));
        check!(!mixed.is_exact());
        check!(mixed.to_string() == "1.0");
    }

    #[test]
    fn printing() {
        check!(num("42").to_string() == "42");
        check!(num("-3.0").to_string() == "-3.0");
        check!(num("1e16").to_string() == "10000000000000000.0");
        check!(num("1.0").mul(&num("10000000000000000")).to_string() == "10000000000000000.0");
        check!(num("1e25").to_string() == "1.0e25");
        check!(num("1.5e-7").to_string() == "1.5e-7");
        check!(num("1+2i").to_string() == "1+2i");
        check!(num("1/2-3/4i").to_string() == "1/2-3/4i");
        check!(num("+i").to_string() == "+1i");
        check!(num("-inf.0").to_string() == "-inf.0");
        check!(num("#x-ff").to_string() == "-255");
        check!(num("#b101").to_string_radix(2).as_deref() == Some("101"));
        check!(Number::parse("abc", 10) == None);
        check!(Number::parse("1/0", 10) == None);
    }

    #[test]
    fn complex_arithmetic() {
        let i = num("+i");
        check!(i.mul(&i) == num("-1"));
        let z = num("3+4i");
        check!(z.magnitude() == num("5"));
        check!(z.conjugate() == num("3-4i"));
        let_assert!(Ok(inverse) = z.inverse());
        check!(inverse == num("3/25-4/25i"));
        check!(num("-4").sqrt() == num("+2i"));
    }

    #[test]
    fn comparing_non_real_numbers_fails() {
        let_assert!(Err(NumberError::NotReal { .. }) = num("1+i").cmp(&num("2"), "<"));
        check!(num("1+i").num_eq(&num("1+i")));
    }

    #[test]
    fn division_by_exact_zero() {
        let_assert!(Err(NumberError::DivisionByZero(_)) = num("1").div(&num("0")));
        let_assert!(Ok(inf) = num("1.0").div(&num("0.0")));
        check!(inf.real_part().to_f64() == f64::INFINITY);
    }

    #[test]
    fn integer_division_signs() {
        let_assert!(Ok(m) = num("-7").modulo(&num("2")));
        check!(m == num("1"));
        let_assert!(Ok(r) = num("-7").remainder(&num("2")));
        check!(r == num("-1"));
        let_assert!(Ok(q) = num("-7").quotient(&num("2")));
        check!(q == num("-3"));
        let_assert!(Ok(half) = num("5/2").round());
        check!(half == num("2"));
    }

    #[test]
    fn exact_inexact_conversion() {
        let_assert!(Ok(exact) = num(".5").to_exact());
        check!(exact == num("1/2"));
        check!(num("1/4").to_inexact() == num("0.25"));
        let_assert!(Ok(big) = num("2").expt(&num("100")));
        check!(big.to_string() == "1267650600228229401496703205376");
        let_assert!(Ok(small) = num("2").expt(&num("-2")));
        check!(small == num("1/4"));
    }

    #[test]
    fn exactness_is_closed_under_and() {
        arbtest(|u| {
            let a: Number = u.arbitrary()?;
            let b: Number = u.arbitrary()?;
            let both = a.is_exact() && b.is_exact();
            check!(a.add(&b).is_exact() == both);
            check!(a.mul(&b).is_exact() == both);
            Ok(())
        });
    }

    #[test]
    fn field_identities_hold_for_exact_numbers() {
        arbtest(|u| {
            let a: Number = u.arbitrary()?;
            let b: Number = u.arbitrary()?;
            if !(a.is_exact() && b.is_exact()) {
                return Ok(());
            }
            check!(a.add(&b).sub(&b) == a);
            if !b.is_zero() {
                let_assert!(Ok(quotient) = a.mul(&b).div(&b));
                check!(quotient == a);
            }
            check!(a.conjugate().conjugate() == a);
            Ok(())
        });
    }

    #[test]
    fn printed_numbers_read_back() {
        arbtest(|u| {
            let n: Number = u.arbitrary()?;
            let printed = n.to_string();
            let_assert!(Some(read) = Number::parse(&printed, 10), "{printed} did not parse");
            check!(read == n, "{printed} did not roundtrip");
            Ok(())
        });
    }

    #[test]
    fn real_components_share_exactness() {
        let n = Number::rectangular(Real::Inexact(1.5), Real::zero());
        check!(!n.is_exact());
        check!(!n.imag_part().is_exact());
    }
}
