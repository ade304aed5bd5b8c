//! LED/touch grid design
//!
//! Root sheet with four children:
//!
//! - `power`: 5 V input connector, 3.3 V LDO and its capacitors
//! - `mcu`: touch controller, I2C pull-ups and header, one input per pad
//! - `touch`: one pad per touch placement reference
//! - `led`: daisy-chained APA102 LEDs with decoupling and a bulk capacitor
//!
//! Pad and LED counts follow the grid and the placement classes, and their
//! references are the placement references.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GeneratorConfig;
use crate::model::{
    HierarchicalSchematic, Net, NetClass, Pin, PinDirection, PinType, Schematic, Sheet, Symbol,
};
use crate::placement::{GridSpec, PlacementClass, PlacementError};

use super::{
    capacitor, layout, resistor, GenerateError, Generator, BULK_FOOTPRINT, CAPACITOR_FOOTPRINT,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TouchGridOptions {
    pub touch_prefix: String,
    pub led_prefix: String,
    /// Build the LED sheet when an LED placement class exists.
    pub leds: bool,
    pub pullup_value: String,
    pub decoupling_value: String,
    pub bulk_value: String,
}

impl Default for TouchGridOptions {
    fn default() -> Self {
        Self {
            touch_prefix: "TP".to_string(),
            led_prefix: "LED".to_string(),
            leds: true,
            pullup_value: "4.7k".to_string(),
            decoupling_value: "100nF".to_string(),
            bulk_value: "470uF".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TouchGridGenerator {
    name: String,
    options: TouchGridOptions,
}

impl Default for TouchGridGenerator {
    fn default() -> Self {
        Self::new("touch_grid", TouchGridOptions::default())
    }
}

impl TouchGridGenerator {
    pub fn new(name: impl Into<String>, options: TouchGridOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }

    pub fn options(&self) -> &TouchGridOptions {
        &self.options
    }

    fn class<'a>(&self, config: &'a GeneratorConfig, prefix: &str) -> Option<&'a PlacementClass> {
        config.placement_classes.iter().find(|c| c.prefix == prefix)
    }
}

/// A placed part: its reference, its suffix and its grid cell.
struct GridPart {
    reference: String,
    suffix: String,
    row: u32,
    col: u32,
}

fn grid_parts(class: &PlacementClass, grid: &GridSpec) -> Result<Vec<GridPart>, PlacementError> {
    let per_cell = class.per_cell().max(1) as usize;
    Ok(class
        .references(grid)?
        .into_iter()
        .enumerate()
        .map(|(i, reference)| {
            let cell = (i / per_cell) as u32;
            let suffix = reference[class.prefix.len()..].to_string();
            GridPart {
                reference,
                suffix,
                row: cell / grid.cols.max(1),
                col: cell % grid.cols.max(1),
            }
        })
        .collect())
}

fn touch_net(suffix: &str) -> String {
    format!("TOUCH_{}", suffix)
}

fn power_sheet(options: &TouchGridOptions) -> Schematic {
    let mut sch = Schematic::new("Power");
    sch.add_port("+5V", PinDirection::Output);
    sch.add_port("+3V3", PinDirection::Output);
    sch.add_port("GND", PinDirection::Passive);

    let (x, y) = layout(0, 4);
    sch.add_symbol(
        Symbol::new("J1", "Connector_Generic:Conn_01x02", "5V_IN")
            .with_footprint("Connector_JST:JST_PH_B2B-PH-K_1x02_P2.00mm_Vertical")
            .with_position(x, y)
            .with_pin(Pin::new("1", "VBUS", PinType::Passive))
            .with_pin(Pin::new("2", "GND", PinType::Passive)),
    );
    let (x, y) = layout(1, 4);
    sch.add_symbol(
        Symbol::new("U1", "Regulator_Linear:AMS1117-3.3", "AMS1117-3.3")
            .with_footprint("Package_TO_SOT_SMD:SOT-223-3_TabPin2")
            .with_position(x, y)
            .with_pin(Pin::new("1", "GND", PinType::PowerIn))
            .with_pin(Pin::new("2", "VO", PinType::PowerOut))
            .with_pin(Pin::new("3", "VI", PinType::PowerIn)),
    );

    let caps = [
        ("C1", options.decoupling_value.as_str(), CAPACITOR_FOOTPRINT, "+5V"),
        ("C2", "10uF", "Capacitor_SMD:C_0805_2012Metric", "+5V"),
        ("C3", options.decoupling_value.as_str(), CAPACITOR_FOOTPRINT, "+3V3"),
        ("C4", "10uF", "Capacitor_SMD:C_0805_2012Metric", "+3V3"),
    ];
    let mut vin = Net::new("+5V").with_class(NetClass::Power).connect("J1", "1").connect("U1", "3");
    let mut vout = Net::new("+3V3").with_class(NetClass::Power).connect("U1", "2");
    let mut gnd = Net::new("GND").with_class(NetClass::Power).connect("J1", "2").connect("U1", "1");
    for (i, (reference, value, footprint, rail)) in caps.iter().enumerate() {
        let (x, y) = layout(4 + i, 4);
        sch.add_symbol(capacitor(reference, value, footprint).with_position(x, y));
        if *rail == "+5V" {
            vin = vin.connect(reference, "1");
        } else {
            vout = vout.connect(reference, "1");
        }
        gnd = gnd.connect(reference, "2");
    }
    sch.add_net(vin);
    sch.add_net(vout);
    sch.add_net(gnd);
    sch
}

fn mcu_sheet(options: &TouchGridOptions, pads: &[GridPart], leds: bool) -> Schematic {
    let mut sch = Schematic::new("MCU");
    sch.add_port("+3V3", PinDirection::Input);
    sch.add_port("GND", PinDirection::Passive);
    if leds {
        sch.add_port("LED_DATA", PinDirection::Output);
        sch.add_port("LED_CLK", PinDirection::Output);
    }
    for pad in pads {
        sch.add_port(touch_net(&pad.suffix), PinDirection::Input);
    }

    let mut mcu = Symbol::new("U1", "netforge:TouchController", "TouchController")
        .with_footprint("Package_QFP:LQFP-100_14x14mm_P0.5mm")
        .with_position(60.96, 60.96)
        .with_pin(Pin::new("1", "VDD", PinType::PowerIn))
        .with_pin(Pin::new("2", "GND", PinType::PowerIn))
        .with_pin(Pin::new("3", "SDA", PinType::Bidirectional))
        .with_pin(Pin::new("4", "SCL", PinType::Bidirectional))
        .with_pin(Pin::new("5", "LED_DATA", PinType::Output))
        .with_pin(Pin::new("6", "LED_CLK", PinType::Output));
    for (i, pad) in pads.iter().enumerate() {
        mcu = mcu.with_pin(Pin::new((10 + i).to_string(), format!("T{}", pad.suffix), PinType::Input));
    }
    sch.add_symbol(mcu);

    let (x, y) = layout(0, 4);
    sch.add_symbol(capacitor("C1", &options.decoupling_value, CAPACITOR_FOOTPRINT).with_position(x, y));
    let (x, y) = layout(1, 4);
    sch.add_symbol(resistor("R1", &options.pullup_value).with_position(x, y));
    let (x, y) = layout(2, 4);
    sch.add_symbol(resistor("R2", &options.pullup_value).with_position(x, y));
    let (x, y) = layout(3, 4);
    sch.add_symbol(
        Symbol::new("J1", "Connector_Generic:Conn_01x04", "I2C")
            .with_footprint("Connector_JST:JST_SH_SM04B-SRSS-TB_1x04-1MP_P1.00mm_Horizontal")
            .with_position(x, y)
            .with_pin(Pin::new("1", "3V3", PinType::Passive))
            .with_pin(Pin::new("2", "GND", PinType::Passive))
            .with_pin(Pin::new("3", "SDA", PinType::Passive))
            .with_pin(Pin::new("4", "SCL", PinType::Passive)),
    );

    sch.add_net(
        Net::new("+3V3")
            .with_class(NetClass::Power)
            .connect("U1", "1")
            .connect("C1", "1")
            .connect("R1", "2")
            .connect("R2", "2")
            .connect("J1", "1"),
    );
    sch.add_net(
        Net::new("GND")
            .with_class(NetClass::Power)
            .connect("U1", "2")
            .connect("C1", "2")
            .connect("J1", "2"),
    );
    sch.add_net(
        Net::new("SDA")
            .with_class(NetClass::OpenDrain)
            .connect("U1", "3")
            .connect("R1", "1")
            .connect("J1", "3"),
    );
    sch.add_net(
        Net::new("SCL")
            .with_class(NetClass::OpenDrain)
            .connect("U1", "4")
            .connect("R2", "1")
            .connect("J1", "4"),
    );
    if leds {
        sch.add_net(Net::new("LED_DATA").with_class(NetClass::Drive).connect("U1", "5"));
        sch.add_net(Net::new("LED_CLK").with_class(NetClass::Drive).connect("U1", "6"));
    }
    for (i, pad) in pads.iter().enumerate() {
        sch.add_net(
            Net::new(touch_net(&pad.suffix))
                .with_class(NetClass::Logic)
                .connect("U1", &(10 + i).to_string()),
        );
    }
    sch
}

fn touch_sheet(class: &PlacementClass, pads: &[GridPart], cols: u32) -> Schematic {
    let mut sch = Schematic::new("Touch");
    for pad in pads {
        sch.add_port(touch_net(&pad.suffix), PinDirection::Passive);
    }
    for (i, pad) in pads.iter().enumerate() {
        let (x, y) = layout(i, cols as usize);
        sch.add_symbol(
            Symbol::new(&pad.reference, "netforge:TouchPad", "TouchPad")
                .with_footprint(&class.footprint)
                .with_position(x, y)
                .with_pin(Pin::new("1", "PAD", PinType::Passive))
                .with_field("Row", pad.row.to_string())
                .with_field("Col", pad.col.to_string()),
        );
        sch.add_net(
            Net::new(touch_net(&pad.suffix))
                .with_class(NetClass::Logic)
                .connect(&pad.reference, "1"),
        );
    }
    sch
}

fn led_sheet(options: &TouchGridOptions, class: &PlacementClass, leds: &[GridPart], grid: &GridSpec) -> Schematic {
    let mut sch = Schematic::new("LED");
    sch.add_port("+5V", PinDirection::Input);
    sch.add_port("GND", PinDirection::Passive);
    sch.add_port("LED_DATA", PinDirection::Input);
    sch.add_port("LED_CLK", PinDirection::Input);

    let mut vcc = Net::new("+5V").with_class(NetClass::Power);
    let mut gnd = Net::new("GND").with_class(NetClass::Power);
    let mut data = Net::new("LED_DATA").with_class(NetClass::Drive);
    let mut clock = Net::new("LED_CLK").with_class(NetClass::Drive);

    let per_row = (grid.cols * class.per_cell()).max(1) as usize;
    for (i, led) in leds.iter().enumerate() {
        let (x, y) = layout(i, per_row);
        sch.add_symbol(
            Symbol::new(&led.reference, "LED:APA102-2020", "APA102-2020")
                .with_footprint(&class.footprint)
                .with_position(x, y)
                .with_pin(Pin::new("1", "DI", PinType::Input))
                .with_pin(Pin::new("2", "CI", PinType::Input))
                .with_pin(Pin::new("3", "DO", PinType::Output))
                .with_pin(Pin::new("4", "CO", PinType::Output))
                .with_pin(Pin::new("5", "VCC", PinType::PowerIn))
                .with_pin(Pin::new("6", "GND", PinType::PowerIn))
                .with_field("Row", led.row.to_string())
                .with_field("Col", led.col.to_string()),
        );
        vcc = vcc.connect(&led.reference, "5");
        gnd = gnd.connect(&led.reference, "6");

        if i == 0 {
            data = data.connect(&led.reference, "1");
            clock = clock.connect(&led.reference, "2");
        }
        if let Some(next) = leds.get(i + 1) {
            sch.add_net(
                Net::new(format!("{}_DO", led.reference))
                    .with_class(NetClass::Drive)
                    .connect(&led.reference, "3")
                    .connect(&next.reference, "1"),
            );
            sch.add_net(
                Net::new(format!("{}_CO", led.reference))
                    .with_class(NetClass::Drive)
                    .connect(&led.reference, "4")
                    .connect(&next.reference, "2"),
            );
        }
    }

    // One decoupling capacitor per grid cell, then the bulk capacitor.
    let cells = grid.cells() as usize;
    let cap_row = (leds.len() / per_row + 1) as f64 * 15.24;
    for k in 1..=cells {
        let reference = format!("C{}", k);
        let (x, y) = layout(k - 1, per_row);
        sch.add_symbol(
            capacitor(&reference, &options.decoupling_value, CAPACITOR_FOOTPRINT)
                .with_position(x, y + cap_row),
        );
        vcc = vcc.connect(&reference, "1");
        gnd = gnd.connect(&reference, "2");
    }
    let bulk = format!("C{}", cells + 1);
    let (x, y) = layout(cells, per_row);
    sch.add_symbol(capacitor(&bulk, &options.bulk_value, BULK_FOOTPRINT).with_position(x, y + cap_row));
    vcc = vcc.connect(&bulk, "1");
    gnd = gnd.connect(&bulk, "2");

    sch.add_net(vcc);
    sch.add_net(gnd);
    sch.add_net(data);
    sch.add_net(clock);
    sch
}

impl Generator for TouchGridGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "LED/touch grid with power, MCU, touch and LED sheets"
    }

    fn generate(&self, config: &GeneratorConfig) -> Result<HierarchicalSchematic, GenerateError> {
        let options = &self.options;
        let grid = &config.grid;
        let touch_class = self
            .class(config, &options.touch_prefix)
            .ok_or_else(|| GenerateError::MissingPlacementClass {
                generator: self.name.clone(),
                prefix: options.touch_prefix.clone(),
            })?;
        let led_class = if options.leds {
            self.class(config, &options.led_prefix)
        } else {
            None
        };

        let pads = grid_parts(touch_class, grid)?;
        let leds = match led_class {
            Some(c) => Some((c, grid_parts(c, grid)?)),
            None => None,
        };

        let mut design = HierarchicalSchematic::new(config.project.name.clone());
        let root = &mut design.root;

        let mut power = Sheet::new("power", "power.kicad_sch", power_sheet(options)).with_position(25.4, 25.4);
        power.add_pin("+5V", PinDirection::Output);
        power.add_pin("+3V3", PinDirection::Output);
        power.add_pin("GND", PinDirection::Passive);
        root.add_sheet(power);

        let mut mcu = Sheet::new("mcu", "mcu.kicad_sch", mcu_sheet(options, &pads, leds.is_some()))
            .with_position(76.2, 25.4);
        mcu.add_pin("+3V3", PinDirection::Input);
        mcu.add_pin("GND", PinDirection::Passive);
        if leds.is_some() {
            mcu.add_pin("LED_DATA", PinDirection::Output);
            mcu.add_pin("LED_CLK", PinDirection::Output);
        }
        for pad in &pads {
            mcu.add_pin(touch_net(&pad.suffix), PinDirection::Input);
        }
        mcu.size = (30.0, 10.0 + 2.54 * (pads.len() + 4) as f64);
        root.add_sheet(mcu);

        let mut touch = Sheet::new("touch", "touch.kicad_sch", touch_sheet(touch_class, &pads, grid.cols))
            .with_position(127.0, 25.4);
        for pad in &pads {
            touch.add_pin(touch_net(&pad.suffix), PinDirection::Passive);
        }
        touch.size = (30.0, 10.0 + 2.54 * pads.len() as f64);
        root.add_sheet(touch);

        let mut vin = Net::new("+5V").with_class(NetClass::Power).global().attach_sheet_pin("power", "+5V");
        let vout = Net::new("+3V3")
            .with_class(NetClass::Power)
            .global()
            .attach_sheet_pin("power", "+3V3")
            .attach_sheet_pin("mcu", "+3V3");
        let mut gnd = Net::new("GND")
            .with_class(NetClass::Power)
            .global()
            .attach_sheet_pin("power", "GND")
            .attach_sheet_pin("mcu", "GND");

        if let Some((class, parts)) = &leds {
            let mut led = Sheet::new("led", "led.kicad_sch", led_sheet(options, class, parts, grid))
                .with_position(177.8, 25.4);
            led.add_pin("+5V", PinDirection::Input);
            led.add_pin("GND", PinDirection::Passive);
            led.add_pin("LED_DATA", PinDirection::Input);
            led.add_pin("LED_CLK", PinDirection::Input);
            root.add_sheet(led);

            vin = vin.attach_sheet_pin("led", "+5V");
            gnd = gnd.attach_sheet_pin("led", "GND");
            root.add_net(
                Net::new("LED_DATA")
                    .with_class(NetClass::Drive)
                    .attach_sheet_pin("mcu", "LED_DATA")
                    .attach_sheet_pin("led", "LED_DATA"),
            );
            root.add_net(
                Net::new("LED_CLK")
                    .with_class(NetClass::Drive)
                    .attach_sheet_pin("mcu", "LED_CLK")
                    .attach_sheet_pin("led", "LED_CLK"),
            );
        }
        root.add_net(vin);
        root.add_net(vout);
        root.add_net(gnd);

        for pad in &pads {
            let name = touch_net(&pad.suffix);
            root.add_net(
                Net::new(name.clone())
                    .with_class(NetClass::Logic)
                    .attach_sheet_pin("mcu", &name)
                    .attach_sheet_pin("touch", &name),
            );
        }

        debug!(
            generator = %self.name,
            pads = pads.len(),
            leds = leds.as_ref().map(|(_, l)| l.len()).unwrap_or(0),
            "touch grid design built"
        );
        Ok(design)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> GeneratorConfig {
        let mut config = GeneratorConfig::default();
        config.project.name = "tiny".to_string();
        config.grid.rows = 2;
        config.grid.cols = 2;
        config
    }

    #[test]
    fn test_default_design_is_valid() {
        let design = TouchGridGenerator::default().generate(&small_config()).unwrap();
        design.validate().unwrap();

        let names: Vec<&str> = design.root.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["power", "mcu", "touch", "led"]);

        let touch = design.scope("/touch").unwrap();
        assert_eq!(touch.symbols.len(), 4);
        assert!(touch.symbol("TP1").is_some());
        assert_eq!(touch.symbol("TP4").unwrap().fields.get("Row").map(String::as_str), Some("1"));

        // 4 cells x 4 LEDs, 4 decoupling capacitors and one bulk capacitor
        let led = design.scope("/led").unwrap();
        assert_eq!(led.symbols.len(), 16 + 5);
        assert!(led.symbol("LED16").is_some());
        assert_eq!(led.symbol("C5").map(|s| s.value.as_str()), Some("470uF"));
    }

    #[test]
    fn test_every_symbol_has_a_footprint() {
        let design = TouchGridGenerator::default().generate(&small_config()).unwrap();
        for scope in design.scopes() {
            for symbol in &scope.schematic.symbols {
                assert!(symbol.footprint.is_some(), "{} in {}", symbol.reference, scope.path);
            }
        }
    }

    #[test]
    fn test_without_leds() {
        let generator = TouchGridGenerator::new(
            "touch_only",
            TouchGridOptions {
                leds: false,
                ..TouchGridOptions::default()
            },
        );
        let design = generator.generate(&small_config()).unwrap();
        design.validate().unwrap();
        assert!(design.root.sheet("led").is_none());
        assert!(design.root.net("LED_DATA").is_none());
    }

    #[test]
    fn test_missing_touch_class() {
        let mut config = small_config();
        config.placement_classes.retain(|c| c.prefix != "TP");
        let err = TouchGridGenerator::default().generate(&config).unwrap_err();
        assert!(matches!(err, GenerateError::MissingPlacementClass { ref prefix, .. } if prefix == "TP"));
    }

    #[test]
    fn test_reference_overflow_is_an_error() {
        let mut config = small_config();
        config.placement_classes[0].start_index = u32::MAX;
        let err = TouchGridGenerator::default().generate(&config).unwrap_err();
        assert!(matches!(err, GenerateError::Placement(PlacementError::IndexOverflow { .. })));
    }
}
