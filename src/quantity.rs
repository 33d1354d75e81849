#[macro_use]
mod macros;

quantity!(Percent, "%");
quantity!(Amps, "A");
quantity!(Volts, "V");

impl Amps {
    /// Round to the whole amps, the way the inverter accepts current limits.
    #[must_use]
    pub fn round(self) -> Self {
        Self(self.0.round())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_ok() {
        assert_eq!(Percent(99.1).to_string(), "99.1 %");
        assert_eq!(format!("{:?}", Amps(-2.1)), "-2.1A");
    }

    #[test]
    fn ordering_ok() {
        assert!(Volts(104.9) < Volts(105.0));
        assert!(Amps(-2.1) < Amps(1.0));
        assert_eq!(Amps(20.0) + Amps(10.0), Amps(30.0));
    }

    #[test]
    fn from_str_ok() {
        assert_eq!("12.5".parse::<Amps>().unwrap(), Amps(12.5));
    }
}
