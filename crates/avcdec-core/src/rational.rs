//! 有理数, 表示样本宽高比与 VUI 帧率.

use std::fmt;

/// `num / den`, 例如帧率 30000/1001 即 29.97fps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 分母为 0, 表示码流未给出该值
    pub const UNDEFINED: Self = Self { num: 0, den: 0 };

    pub const fn is_valid(&self) -> bool {
        self.den != 0
    }

    /// 分母为 0 时返回 NaN
    pub fn to_f64(self) -> f64 {
        if self.is_valid() {
            f64::from(self.num) / f64::from(self.den)
        } else {
            f64::NAN
        }
    }

    /// 约分, 结果的分母恒为正; 未定义值原样返回
    pub fn reduce(self) -> Self {
        let divisor = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        if divisor == 0 || !self.is_valid() {
            return self;
        }
        let sign: i64 = if self.den < 0 { -1 } else { 1 };
        let scale = |v: i32| (sign * i64::from(v) / i64::from(divisor)) as i32;
        Self::new(scale(self.num), scale(self.den))
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_vui_frame_rate() {
        // time_scale / (2 * num_units_in_tick)
        assert_eq!(Rational::new(60000, 2002).reduce(), Rational::new(30000, 1001));
        assert_eq!(Rational::new(50, 2).reduce(), Rational::new(25, 1));
        assert_eq!(Rational::new(4, -6).reduce(), Rational::new(-2, 3));
        assert_eq!(Rational::UNDEFINED.reduce(), Rational::UNDEFINED);
    }

    #[test]
    fn test_undefined_and_display() {
        assert!(!Rational::UNDEFINED.is_valid());
        assert!(Rational::UNDEFINED.to_f64().is_nan());
        assert_eq!(Rational::new(16, 11).to_string(), "16/11");
        assert!((Rational::new(30000, 1001).to_f64() - 29.97).abs() < 0.01);
    }
}
