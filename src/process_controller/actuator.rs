//! Actuator serial link: syringe controller command vocabulary (spec.md
//! §3, §6). Fixed ASCII frames `<OP[:ARG]>`.

use crate::error::AppResult;
use crate::serial_transport::LineChannel;

pub struct Actuator<'a> {
    link: &'a mut dyn LineChannel,
}

impl<'a> Actuator<'a> {
    pub fn new(link: &'a mut dyn LineChannel) -> Self {
        Self { link }
    }

    pub fn home(&mut self) -> AppResult<()> {
        self.link.write_line("<GH>")
    }

    pub fn goto(&mut self, position: i64) -> AppResult<()> {
        self.link.write_line(&format!("<GO:{position:+07}>"))
    }

    pub fn set_speed(&mut self, speed: u32) -> AppResult<()> {
        self.link.write_line(&format!("<SP:{speed:03}>"))
    }

    /// Sends `<ST>` and returns `true` when the response is `<ON>`
    /// (motor running), `false` for `<OFF>`.
    pub fn motor_on(&mut self) -> AppResult<bool> {
        self.link.write_line("<ST>")?;
        let response = self.link.read_line()?.unwrap_or_default();
        Ok(response.trim() == "<ON>")
    }

    pub fn position(&mut self) -> AppResult<Option<i64>> {
        self.link.write_line("<GP>")?;
        let response = self.link.read_line()?.unwrap_or_default();
        Ok(parse_position(&response))
    }
}

fn parse_position(frame: &str) -> Option<i64> {
    let inner = frame.trim().trim_start_matches('<').trim_end_matches('>');
    inner.strip_prefix("POS:")?.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_position_frame() {
        assert_eq!(parse_position("<POS:+001234>"), Some(1234));
        assert_eq!(parse_position("<OF>"), None);
    }
}
