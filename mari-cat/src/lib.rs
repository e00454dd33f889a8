use colored::*;
use mari_frame::*;

struct Writer<'b> {
    buffer: &'b mut String,
    indent: usize,
}

impl<'b> Writer<'b> {
    fn new(buffer: &'b mut String) -> Self {
        Self { buffer, indent: 0 }
    }

    fn increase_indent(&mut self) {
        self.indent += 2;
    }

    fn write(&mut self, s: String) {
        self.buffer.push_str(&" ".repeat(self.indent));
        self.buffer.push_str(&s);
    }

    fn writeln(&mut self, s: String) {
        self.write(s);
        self.buffer.push('\n');
    }
}

pub struct FrameParser {}

impl FrameParser {
    pub fn parse_hex(input: &str) -> Result<String> {
        let data = hex::decode(input).map_err(|_| Error::Length)?;
        Self::parse(&data)
    }

    pub fn parse(input: &[u8]) -> Result<String> {
        let frame = FrameRepr::parse(input, NETWORK_ID_ANY)?;
        let mut buffer = String::new();

        let mut w = Writer::new(&mut buffer);

        match frame {
            FrameRepr::Beacon(beacon) => {
                w.writeln("Beacon".underline().bold().to_string());
                w.increase_indent();
                w.writeln(format!("{}: {}", "network id".bold(), beacon.network_id));
                w.writeln(format!("{}: {}", "asn".bold(), beacon.asn));
                w.writeln(format!("{}: {:016x}", "src".bold(), beacon.src));
                w.writeln(format!(
                    "{}: {}",
                    "remaining capacity".bold(),
                    beacon.remaining_capacity
                ));
                w.writeln(format!(
                    "{}: {}",
                    "active schedule id".bold(),
                    beacon.active_schedule_id
                ));
                match beacon.bloom {
                    Some(digest) => {
                        let bits: u32 = digest.iter().map(|byte| byte.count_ones()).sum();
                        w.writeln(format!(
                            "{}: {} bytes, {} bits set",
                            "bloom digest".bold(),
                            digest.len(),
                            bits
                        ));
                    }
                    None => w.writeln(format!("{}: absent", "bloom digest".bold())),
                }
            }
            FrameRepr::JoinRequest(request) => {
                w.writeln("Join Request".underline().bold().to_string());
                w.increase_indent();
                Self::write_addressed(&mut w, &request.header);
                match request.security {
                    Some(blob) => w.writeln(format!(
                        "{}: {} opaque bytes",
                        "security".bold(),
                        blob.len()
                    )),
                    None => w.writeln(format!("{}: absent", "security".bold())),
                }
            }
            FrameRepr::JoinResponse(response) => {
                w.writeln("Join Response".underline().bold().to_string());
                w.increase_indent();
                Self::write_addressed(&mut w, &response.header);
                w.writeln(format!(
                    "{}: {}",
                    "gateway full".bold(),
                    response.flags.contains(JoinResponseFlags::GATEWAY_FULL) as usize
                ));
                w.writeln(format!("{}: {}", "cell index".bold(), response.cell_index));
            }
            FrameRepr::Keepalive(keepalive) => {
                w.writeln("Keepalive".underline().bold().to_string());
                w.increase_indent();
                Self::write_addressed(&mut w, &keepalive.header);
            }
            FrameRepr::Data(data) => {
                w.writeln("Data".underline().bold().to_string());
                w.increase_indent();
                Self::write_addressed(&mut w, &data.header);
                w.writeln(format!("{}: {:x?}", "payload".bold(), data.payload));
            }
        }

        Ok(buffer)
    }

    fn write_addressed(w: &mut Writer, header: &PacketHeaderRepr) {
        w.writeln(format!("{}: {}", "network id".bold(), header.network_id));
        w.writeln(format!("{}: {:016x}", "dst".bold(), header.dst));
        w.writeln(format!("{}: {:016x}", "src".bold(), header.src));
        w.writeln(format!("{}: {}", "rssi stat".bold(), header.rssi_stat));
    }
}
