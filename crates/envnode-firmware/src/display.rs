use alloc::string::{String, ToString};
use alloc::vec::Vec;

use embedded_graphics::draw_target::DrawTarget;
use embedded_graphics::mono_font::iso_8859_1::{FONT_10X20, FONT_6X10};
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::{Rgb565, RgbColor};
use embedded_graphics::prelude::Point;
use embedded_graphics::text::{Baseline, Text};
use embedded_graphics::Drawable;
use embedded_hal::delay::DelayNs;
use envnode_core::peripherals::{StatusDisplay, TextSize};
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::peripherals::{
    GPIO38, GPIO39, GPIO40, GPIO41, GPIO42, GPIO45, GPIO46, GPIO47, GPIO48, GPIO5, GPIO6, GPIO7,
    GPIO8, GPIO9,
};
use log::{error, info};
use mipidsi::interface::{Generic8BitBus, ParallelError, ParallelInterface};
use mipidsi::models::ST7789;
use mipidsi::options::{ColorInversion, Orientation, Rotation};
use mipidsi::{Builder, Display as MipiDisplay};

use crate::config::{DISPLAY_HEIGHT, DISPLAY_WIDTH};

// Glyph widths must match `TextSize::advance`.
const SMALL_STYLE: MonoTextStyle<Rgb565> = MonoTextStyle::new(&FONT_6X10, Rgb565::WHITE);
const LARGE_STYLE: MonoTextStyle<Rgb565> = MonoTextStyle::new(&FONT_10X20, Rgb565::WHITE);

type MipiDisplayWrapper<'a> = MipiDisplay<
    ParallelInterface<
        Generic8BitBus<
            Output<'a>,
            Output<'a>,
            Output<'a>,
            Output<'a>,
            Output<'a>,
            Output<'a>,
            Output<'a>,
            Output<'a>,
        >,
        Output<'a>,
        Output<'a>,
    >,
    ST7789,
    Output<'a>,
>;

/// ST7789 panel of the T-Display-S3 on its 8-bit parallel bus.
pub struct Display<'a, D: DelayNs> {
    display: MipiDisplayWrapper<'a>,
    backlight: Output<'a>,
    delay: D,
    asleep: bool,
    pending: Vec<TextItem>,
    shown: Vec<TextItem>,
}

#[derive(Debug, Clone, PartialEq)]
struct TextItem {
    position: Point,
    text: String,
    size: TextSize,
}

pub struct DisplayPeripherals {
    pub rst: GPIO5<'static>,
    pub cs: GPIO6<'static>,
    pub dc: GPIO7<'static>,
    pub wr: GPIO8<'static>,
    pub rd: GPIO9<'static>,
    pub backlight: GPIO38<'static>,
    pub d0: GPIO39<'static>,
    pub d1: GPIO40<'static>,
    pub d2: GPIO41<'static>,
    pub d3: GPIO42<'static>,
    pub d4: GPIO45<'static>,
    pub d5: GPIO46<'static>,
    pub d6: GPIO47<'static>,
    pub d7: GPIO48<'static>,
}

impl<D: DelayNs> Display<'_, D> {
    pub fn new(p: DisplayPeripherals, mut delay: D) -> Result<Self, Error> {
        let mut backlight = Output::new(p.backlight, Level::Low, OutputConfig::default());

        let dc = Output::new(p.dc, Level::Low, OutputConfig::default());
        let mut cs = Output::new(p.cs, Level::Low, OutputConfig::default());
        let rst = Output::new(p.rst, Level::Low, OutputConfig::default());
        let wr = Output::new(p.wr, Level::Low, OutputConfig::default());
        let mut rd = Output::new(p.rd, Level::Low, OutputConfig::default());

        cs.set_low();
        rd.set_high();

        let d0 = Output::new(p.d0, Level::Low, OutputConfig::default());
        let d1 = Output::new(p.d1, Level::Low, OutputConfig::default());
        let d2 = Output::new(p.d2, Level::Low, OutputConfig::default());
        let d3 = Output::new(p.d3, Level::Low, OutputConfig::default());
        let d4 = Output::new(p.d4, Level::Low, OutputConfig::default());
        let d5 = Output::new(p.d5, Level::Low, OutputConfig::default());
        let d6 = Output::new(p.d6, Level::Low, OutputConfig::default());
        let d7 = Output::new(p.d7, Level::Low, OutputConfig::default());

        let bus = Generic8BitBus::new((d0, d1, d2, d3, d4, d5, d6, d7));

        let di = ParallelInterface::new(bus, dc, wr);

        let mut display = Builder::new(mipidsi::models::ST7789, di)
            .display_size(DISPLAY_HEIGHT, DISPLAY_WIDTH)
            .display_offset((240 - DISPLAY_HEIGHT) / 2, 0)
            .orientation(Orientation::new().rotate(Rotation::Deg270))
            .invert_colors(ColorInversion::Inverted)
            .reset_pin(rst)
            .init(&mut delay)
            .map_err(|_| Error::InitError)?;

        display.clear(RgbColor::BLACK)?;
        backlight.set_high();
        info!("Display initialized ({}x{})", DISPLAY_WIDTH, DISPLAY_HEIGHT);

        Ok(Self {
            display,
            backlight,
            delay,
            asleep: false,
            pending: Vec::new(),
            shown: Vec::new(),
        })
    }

    fn wake(&mut self) -> Result<(), Error> {
        if self.asleep {
            self.display.wake(&mut self.delay)?;
            self.backlight.set_high();
            self.asleep = false;
        }
        Ok(())
    }

    fn enable_powersave(&mut self) -> Result<(), Error> {
        if !self.asleep {
            self.backlight.set_low();
            self.display.sleep(&mut self.delay)?;
            self.asleep = true;
        }
        Ok(())
    }

    fn repaint(&mut self) -> Result<(), Error> {
        self.wake()?;
        self.display.clear(RgbColor::BLACK)?;
        for item in &self.pending {
            let style = match item.size {
                TextSize::Small => SMALL_STYLE,
                TextSize::Large => LARGE_STYLE,
            };
            Text::with_baseline(&item.text, item.position, style, Baseline::Top)
                .draw(&mut self.display)?;
        }
        Ok(())
    }
}

impl<D: DelayNs> StatusDisplay for Display<'_, D> {
    fn clear(&mut self) {
        self.pending.clear();
    }

    fn draw_text(&mut self, x: i32, y: i32, text: &str, size: TextSize) {
        self.pending.push(TextItem {
            position: Point::new(x, y),
            text: text.to_string(),
            size,
        });
    }

    /// Repaints the panel when the frame differs from the one on screen.
    /// An empty frame turns the backlight and the panel off.
    fn present(&mut self) {
        if self.pending.is_empty() {
            if let Err(e) = self.enable_powersave() {
                error!("Cannot power down display: {}", e);
            }
            self.shown.clear();
            return;
        }
        if !self.asleep && self.pending == self.shown {
            return;
        }
        match self.repaint() {
            Ok(()) => core::mem::swap(&mut self.shown, &mut self.pending),
            Err(e) => {
                error!("Cannot draw on display: {}", e);
                self.shown.clear();
            }
        }
    }
}

/// A display error
#[derive(Debug)]
pub enum Error {
    DisplayInterface(&'static str),
    InitError,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::DisplayInterface(msg) => write!(f, "Display interface error: {msg}"),
            Error::InitError => write!(f, "Display initialization error"),
        }
    }
}

impl<BUS, DC, WR> From<ParallelError<BUS, DC, WR>> for Error {
    fn from(e: ParallelError<BUS, DC, WR>) -> Self {
        match e {
            ParallelError::Bus(_) => Self::DisplayInterface("Bus error"),
            ParallelError::Dc(_) => Self::DisplayInterface("Data/command pin error"),
            ParallelError::Wr(_) => Self::DisplayInterface("Write pin error"),
        }
    }
}
