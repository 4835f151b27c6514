//! Synthetic mzML documents for tests, rendered with correct byte offsets so
//! the `indexedmzML` trailer agrees with the document it indexes.
use std::fmt::Write as _;
use std::io::{self, Write};

use flate2::write::ZlibEncoder;
use flate2::Compression;

pub(crate) const FIXTURE_CHECKSUM: &str = "3f786850e387550fdab836ed7e6dc881de23001b";

/// A deliberate flaw rendered into one spectrum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Defect {
    /// The ms level value is not a number
    BadMsLevel,
    /// The `<spectrum>` element has no `id`
    MissingId,
    /// Neither an ms level nor a spectrum type term
    MissingMsLevel,
    /// The m/z payload is cut short
    TruncatedSignal,
}

#[derive(Debug, Clone)]
pub(crate) struct FixturePrecursor {
    pub selected_mz: Option<f64>,
    pub charge: Option<i32>,
    pub target: Option<f64>,
    pub offsets: Option<(f64, f64)>,
    pub spectrum_ref: Option<String>,
    pub ion_mobility: Option<f64>,
}

impl FixturePrecursor {
    pub fn new(selected_mz: Option<f64>) -> Self {
        Self {
            selected_mz,
            charge: Some(2),
            target: None,
            offsets: None,
            spectrum_ref: Some("scan=1".to_string()),
            ion_mobility: None,
        }
    }

    pub fn with_window(mut self, target: f64, lower_offset: f64, upper_offset: f64) -> Self {
        self.target = Some(target);
        self.offsets = Some((lower_offset, upper_offset));
        self
    }

    pub fn with_offsets(mut self, lower_offset: f64, upper_offset: f64) -> Self {
        self.offsets = Some((lower_offset, upper_offset));
        self
    }

    pub fn with_ion_mobility(mut self, ion_mobility: f64) -> Self {
        self.ion_mobility = Some(ion_mobility);
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FixtureSpectrum {
    pub id: String,
    pub ms_level: u8,
    pub points: Vec<(f64, f32)>,
    pub precursor: Option<FixturePrecursor>,
    pub zlib: bool,
    pub defect: Option<Defect>,
}

impl FixtureSpectrum {
    pub fn ms1(id: &str, points: &[(f64, f32)]) -> Self {
        Self {
            id: id.to_string(),
            ms_level: 1,
            points: points.to_vec(),
            precursor: None,
            zlib: false,
            defect: None,
        }
    }

    pub fn msn(id: &str, points: &[(f64, f32)], precursor: FixturePrecursor) -> Self {
        Self {
            ms_level: 2,
            precursor: Some(precursor),
            ..Self::ms1(id, points)
        }
    }

    pub fn zlib(mut self) -> Self {
        self.zlib = true;
        self
    }

    pub fn with_defect(mut self, defect: Defect) -> Self {
        self.defect = Some(defect);
        self
    }
}

const HEADER: &str = r#"  <cvList count="2">
    <cv id="MS" fullName="Proteomics Standards Initiative Mass Spectrometry Ontology" version="4.1.30" URI="https://raw.githubusercontent.com/HUPO-PSI/psi-ms-CV/master/psi-ms.obo"/>
    <cv id="UO" fullName="Unit Ontology" version="09:04:2014" URI="https://raw.githubusercontent.com/bio-ontology-research-group/unit-ontology/master/unit.obo"/>
  </cvList>
  <fileDescription>
    <fileContent>
      <cvParam cvRef="MS" accession="MS:1000579" name="MS1 spectrum" value=""/>
      <cvParam cvRef="MS" accession="MS:1000580" name="MSn spectrum" value=""/>
    </fileContent>
    <sourceFileList count="1">
      <sourceFile id="RAW1" name="fixture.raw" location="file:///data">
        <cvParam cvRef="MS" accession="MS:1000768" name="Thermo nativeID format" value=""/>
        <cvParam cvRef="MS" accession="MS:1000563" name="Thermo RAW format" value=""/>
      </sourceFile>
    </sourceFileList>
  </fileDescription>
  <referenceableParamGroupList count="1">
    <referenceableParamGroup id="CommonParams">
      <cvParam cvRef="MS" accession="MS:1000130" name="positive scan" value=""/>
    </referenceableParamGroup>
  </referenceableParamGroupList>
  <softwareList count="1">
    <software id="pwiz" version="3.0.23">
      <cvParam cvRef="MS" accession="MS:1000615" name="ProteoWizard software" value=""/>
    </software>
  </softwareList>
  <instrumentConfigurationList count="1">
    <instrumentConfiguration id="IC1">
      <cvParam cvRef="MS" accession="MS:1000483" name="Thermo Fisher Scientific instrument model" value=""/>
    </instrumentConfiguration>
  </instrumentConfigurationList>
  <dataProcessingList count="1">
    <dataProcessing id="pwiz_conversion">
      <processingMethod order="0" softwareRef="pwiz">
        <cvParam cvRef="MS" accession="MS:1000544" name="Conversion to mzML" value=""/>
      </processingMethod>
    </dataProcessing>
  </dataProcessingList>
  <run id="fixture_run" defaultInstrumentConfigurationRef="IC1" startTimeStamp="2024-03-01T10:00:00Z" defaultSourceFileRef="RAW1">
"#;

fn encode_payload(raw: &[u8], zlib: bool) -> String {
    let bytes = if zlib {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw).unwrap();
        encoder.finish().unwrap()
    } else {
        raw.to_vec()
    };
    base64_simd::STANDARD.encode_to_string(bytes)
}

fn cv(out: &mut String, indent: usize, accession: &str, name: &str, value: &str) {
    writeln!(
        out,
        r#"{:indent$}<cvParam cvRef="MS" accession="{accession}" name="{name}" value="{value}"/>"#,
        ""
    )
    .unwrap();
}

fn cv_unit(out: &mut String, indent: usize, accession: &str, name: &str, value: &str, unit: (&str, &str)) {
    let unit_cv = &unit.0[..2];
    writeln!(
        out,
        r#"{:indent$}<cvParam cvRef="MS" accession="{accession}" name="{name}" value="{value}" unitCvRef="{unit_cv}" unitAccession="{}" unitName="{}"/>"#,
        "", unit.0, unit.1
    )
    .unwrap();
}

const MZ_UNIT: (&str, &str) = ("MS:1000040", "m/z");
const COUNTS_UNIT: (&str, &str) = ("MS:1000131", "number of detector counts");

fn render_precursor(out: &mut String, precursor: &FixturePrecursor) {
    out.push_str("        <precursorList count=\"1\">\n");
    match &precursor.spectrum_ref {
        Some(r) => writeln!(out, "          <precursor spectrumRef=\"{r}\">").unwrap(),
        None => out.push_str("          <precursor>\n"),
    }
    if precursor.target.is_some() || precursor.offsets.is_some() {
        out.push_str("            <isolationWindow>\n");
        if let Some(target) = precursor.target {
            cv_unit(out, 14, "MS:1000827", "isolation window target m/z", &target.to_string(), MZ_UNIT);
        }
        if let Some((lo, hi)) = precursor.offsets {
            cv_unit(out, 14, "MS:1000828", "isolation window lower offset", &lo.to_string(), MZ_UNIT);
            cv_unit(out, 14, "MS:1000829", "isolation window upper offset", &hi.to_string(), MZ_UNIT);
        }
        out.push_str("            </isolationWindow>\n");
    }
    out.push_str("            <selectedIonList count=\"1\">\n              <selectedIon>\n");
    if let Some(mz) = precursor.selected_mz {
        cv_unit(out, 16, "MS:1000744", "selected ion m/z", &mz.to_string(), MZ_UNIT);
    }
    if let Some(z) = precursor.charge {
        cv(out, 16, "MS:1000041", "charge state", &z.to_string());
    }
    cv_unit(out, 16, "MS:1000042", "peak intensity", "1520000", COUNTS_UNIT);
    if let Some(im) = precursor.ion_mobility {
        cv_unit(
            out,
            16,
            "MS:1002815",
            "inverse reduced ion mobility",
            &im.to_string(),
            ("MS:1002814", "volt-second per square centimeter"),
        );
    }
    out.push_str("              </selectedIon>\n            </selectedIonList>\n");
    out.push_str("            <activation>\n");
    cv(out, 14, "MS:1000133", "collision-induced dissociation", "");
    cv_unit(out, 14, "MS:1000045", "collision energy", "35", ("UO:0000266", "electronvolt"));
    out.push_str("            </activation>\n");
    out.push_str("          </precursor>\n        </precursorList>\n");
}

fn render_array(
    out: &mut String,
    payload: &str,
    zlib: bool,
    dtype: (&str, &str),
    name: (&str, &str),
    unit: (&str, &str),
) {
    writeln!(
        out,
        "          <binaryDataArray encodedLength=\"{}\">",
        payload.len()
    )
    .unwrap();
    cv(out, 12, dtype.0, dtype.1, "");
    if zlib {
        cv(out, 12, "MS:1000574", "zlib compression", "");
    } else {
        cv(out, 12, "MS:1000576", "no compression", "");
    }
    cv_unit(out, 12, name.0, name.1, "", unit);
    writeln!(out, "            <binary>{payload}</binary>").unwrap();
    out.push_str("          </binaryDataArray>\n");
}

fn render_spectrum(out: &mut String, ordinal: usize, spectrum: &FixtureSpectrum) {
    let n = spectrum.points.len();
    if spectrum.defect == Some(Defect::MissingId) {
        writeln!(out, r#"      <spectrum index="{ordinal}" defaultArrayLength="{n}">"#).unwrap();
    } else {
        writeln!(
            out,
            r#"      <spectrum index="{ordinal}" id="{}" defaultArrayLength="{n}">"#,
            spectrum.id
        )
        .unwrap();
    }
    match spectrum.defect {
        Some(Defect::MissingMsLevel) => {}
        Some(Defect::BadMsLevel) => cv(out, 8, "MS:1000511", "ms level", "two"),
        _ => {
            cv(out, 8, "MS:1000511", "ms level", &spectrum.ms_level.to_string());
            if spectrum.ms_level == 1 {
                cv(out, 8, "MS:1000579", "MS1 spectrum", "");
            } else {
                cv(out, 8, "MS:1000580", "MSn spectrum", "");
            }
        }
    }
    out.push_str("        <referenceableParamGroupRef ref=\"CommonParams\"/>\n");
    cv(out, 8, "MS:1000127", "centroid spectrum", "");
    cv_unit(out, 8, "MS:1000504", "base peak m/z", "445.12", MZ_UNIT);

    out.push_str("        <scanList count=\"1\">\n");
    cv(out, 10, "MS:1000795", "no combination", "");
    out.push_str("          <scan instrumentConfigurationRef=\"IC1\">\n");
    let start_time = (30 * (ordinal + 1)).to_string();
    cv_unit(out, 12, "MS:1000016", "scan start time", &start_time, ("UO:0000010", "second"));
    cv_unit(out, 12, "MS:1000927", "ion injection time", "25.5", ("UO:0000028", "millisecond"));
    out.push_str("            <scanWindowList count=\"1\">\n              <scanWindow>\n");
    cv_unit(out, 16, "MS:1000501", "scan window lower limit", "100", MZ_UNIT);
    cv_unit(out, 16, "MS:1000500", "scan window upper limit", "2000", MZ_UNIT);
    out.push_str("              </scanWindow>\n            </scanWindowList>\n");
    out.push_str("          </scan>\n        </scanList>\n");

    if let Some(precursor) = &spectrum.precursor {
        render_precursor(out, precursor);
    }

    let mut mz_raw: Vec<u8> = spectrum
        .points
        .iter()
        .flat_map(|(mz, _)| mz.to_le_bytes())
        .collect();
    if spectrum.defect == Some(Defect::TruncatedSignal) {
        mz_raw.truncate(mz_raw.len() / 2 + 3);
    }
    let intensity_raw: Vec<u8> = spectrum
        .points
        .iter()
        .flat_map(|(_, i)| i.to_le_bytes())
        .collect();
    out.push_str("        <binaryDataArrayList count=\"2\">\n");
    render_array(
        out,
        &encode_payload(&mz_raw, spectrum.zlib),
        spectrum.zlib,
        ("MS:1000523", "64-bit float"),
        ("MS:1000514", "m/z array"),
        MZ_UNIT,
    );
    render_array(
        out,
        &encode_payload(&intensity_raw, spectrum.zlib),
        spectrum.zlib,
        ("MS:1000521", "32-bit float"),
        ("MS:1000515", "intensity array"),
        COUNTS_UNIT,
    );
    out.push_str("        </binaryDataArrayList>\n");
    out.push_str("      </spectrum>\n");
}

/// Render a complete mzML document. When `indexed` is set the document is
/// wrapped in `<indexedmzML>` with a spectrum offset index and checksum.
pub(crate) fn render_mzml(spectra: &[FixtureSpectrum], indexed: bool) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    if indexed {
        out.push_str("<indexedmzML xmlns=\"http://psi.hupo.org/ms/mzml\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:schemaLocation=\"http://psi.hupo.org/ms/mzml http://psidev.info/files/ms/mzML/xsd/mzML1.1.2_idx.xsd\">\n");
    }
    out.push_str("<mzML xmlns=\"http://psi.hupo.org/ms/mzml\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" id=\"fixture\" version=\"1.1.0\">\n");
    out.push_str(HEADER);
    writeln!(
        out,
        "    <spectrumList count=\"{}\" defaultDataProcessingRef=\"pwiz_conversion\">",
        spectra.len()
    )
    .unwrap();
    let mut offsets = Vec::new();
    for (i, spectrum) in spectra.iter().enumerate() {
        // the offset of `<spectrum`, past the indentation
        let offset = out.len() + 6;
        if spectrum.defect != Some(Defect::MissingId) {
            offsets.push((spectrum.id.clone(), offset));
        }
        render_spectrum(&mut out, i, spectrum);
    }
    out.push_str("    </spectrumList>\n  </run>\n</mzML>\n");
    if indexed {
        let index_offset = out.len();
        writeln!(out, "<indexList count=\"1\">\n  <index name=\"spectrum\">").unwrap();
        for (id, offset) in offsets {
            writeln!(out, "    <offset idRef=\"{id}\">{offset}</offset>").unwrap();
        }
        out.push_str("  </index>\n</indexList>\n");
        writeln!(out, "<indexListOffset>{index_offset}</indexListOffset>").unwrap();
        writeln!(out, "<fileChecksum>{FIXTURE_CHECKSUM}</fileChecksum>").unwrap();
        out.push_str("</indexedmzML>\n");
    }
    out
}

/// Write `content` to a named temporary file ending with `suffix`
pub(crate) fn write_fixture(content: &[u8], suffix: &str) -> io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("mzstream")
        .suffix(suffix)
        .tempfile()?;
    file.write_all(content)?;
    file.flush()?;
    Ok(file)
}

/// Five spectra alternating MS1 and MS2, with the third one's m/z payload
/// truncated
pub(crate) fn five_with_truncated_third() -> Vec<FixtureSpectrum> {
    (0..5)
        .map(|i| {
            let id = format!("controllerType=0 controllerNumber=1 scan={}", i + 1);
            let base = 100.0 + i as f64;
            let points = [(base, 10.0), (base + 50.0, 20.0), (base + 100.0, 5.0)];
            let spectrum = if i % 2 == 0 {
                FixtureSpectrum::ms1(&id, &points)
            } else {
                FixtureSpectrum::msn(&id, &points, FixturePrecursor::new(Some(445.12 + i as f64)))
            };
            if i == 2 {
                spectrum.with_defect(Defect::TruncatedSignal)
            } else {
                spectrum
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_offsets_point_at_spectra() {
        let doc = render_mzml(&five_with_truncated_third(), true);
        let mut n = 0;
        for line in doc.lines().filter(|l| l.trim_start().starts_with("<offset ")) {
            let start = line.find('>').unwrap() + 1;
            let end = line.rfind('<').unwrap();
            let offset: usize = line[start..end].parse().unwrap();
            assert!(doc[offset..].starts_with("<spectrum "));
            n += 1;
        }
        assert_eq!(n, 5);
        let start = doc.find("<indexListOffset>").unwrap() + "<indexListOffset>".len();
        let end = doc.find("</indexListOffset>").unwrap();
        let offset: usize = doc[start..end].parse().unwrap();
        assert!(doc[offset..].starts_with("<indexList "));
    }
}
